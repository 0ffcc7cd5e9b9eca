use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscribers::{
    LastPayment, SubscriberEntity, SubscriptionActivation,
};
use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

#[async_trait]
#[automock]
pub trait SubscriberRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<SubscriberEntity>>;

    async fn activate_subscription(
        &self,
        user_id: Uuid,
        activation: SubscriptionActivation,
    ) -> Result<()>;

    async fn clear_subscription(&self, user_id: Uuid) -> Result<()>;

    async fn update_subscription_status(
        &self,
        user_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<()>;

    async fn record_last_payment(&self, user_id: Uuid, payment: LastPayment) -> Result<()>;

    async fn set_grace_period(
        &self,
        user_id: Uuid,
        grace_period_end: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn start_trial(
        &self,
        user_id: Uuid,
        trial_start: DateTime<Utc>,
        trial_end: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_cancel_at_period_end(&self, user_id: Uuid, cancel: bool) -> Result<()>;

    async fn set_pending_plan_change(
        &self,
        user_id: Uuid,
        plan_id: String,
        effective_date: DateTime<Utc>,
    ) -> Result<()>;

    async fn apply_plan_change(&self, user_id: Uuid, plan_id: String) -> Result<()>;

    async fn find_due_plan_changes(&self, now: DateTime<Utc>) -> Result<Vec<SubscriberEntity>>;
}
