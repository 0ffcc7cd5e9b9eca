use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::payment_failures;

/// One row per failed charge attempt. `attempt_number` strictly increases
/// along a payment's failure chain; a row is terminal once the attempt count
/// reaches `max_retry_attempts` or the reason is permanent.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payment_failures)]
pub struct PaymentFailureEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_id: String,
    pub subscription_id: Option<String>,
    pub failure_reason: String,
    pub failure_code: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub attempt_number: i32,
    pub max_retry_attempts: i32,
    pub next_retry_date: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payment_failures)]
pub struct NewPaymentFailureEntity {
    pub user_id: Uuid,
    pub payment_id: String,
    pub subscription_id: Option<String>,
    pub failure_reason: String,
    pub failure_code: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub attempt_number: i32,
    pub max_retry_attempts: i32,
    pub next_retry_date: Option<DateTime<Utc>>,
}
