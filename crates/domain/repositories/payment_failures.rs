use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::payment_failures::{NewPaymentFailureEntity, PaymentFailureEntity};

#[async_trait]
#[automock]
pub trait PaymentFailureRepository {
    async fn record_failure(&self, failure: NewPaymentFailureEntity) -> Result<Uuid>;

    /// Due retries: next_retry_date has passed, not yet processed, attempts
    /// not exhausted.
    async fn find_due_retries(&self, now: DateTime<Utc>) -> Result<Vec<PaymentFailureEntity>>;

    /// Atomic conditional claim: succeeds for exactly one claimant per
    /// failure, so concurrent sweeps never double-charge.
    async fn claim_for_retry(&self, failure_id: Uuid, claimed_at: DateTime<Utc>) -> Result<bool>;

    /// Marks every open failure for the user resolved after a recovery.
    async fn resolve_for_user(&self, user_id: Uuid, resolved_at: DateTime<Utc>) -> Result<usize>;
}
