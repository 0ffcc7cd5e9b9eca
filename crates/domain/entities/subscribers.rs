use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::infra::db::postgres::schema::subscribers;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentMethodInfo {
    #[serde(rename = "type")]
    pub method_type: Option<String>,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,
}

/// One row per user; never deleted, only mutated by webhook handlers, the
/// dunning sweep, the plan-change sweep and trial start. Serialized as the
/// cache snapshot behind the reconciliation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscribed: bool,
    pub subscription_tier: Option<String>,
    pub subscription_status: String,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub preapproval_id: Option<String>,
    pub trial_active: bool,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethodInfo>,
    pub last_payment_amount_minor: Option<i64>,
    pub last_payment_currency: Option<String>,
    pub last_payment_status: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub pending_plan_change: Option<String>,
    pub plan_change_effective_date: Option<DateTime<Utc>>,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriberEntity {
    /// Empty billing shape for a user with no subscription or trial history.
    pub fn blank(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            subscribed: false,
            subscription_tier: None,
            subscription_status: String::new(),
            subscription_start: None,
            subscription_end: None,
            cancel_at_period_end: false,
            preapproval_id: None,
            trial_active: false,
            trial_start: None,
            trial_end: None,
            payment_method: None,
            last_payment_amount_minor: None,
            last_payment_currency: None,
            last_payment_status: None,
            last_payment_date: None,
            pending_plan_change: None,
            plan_change_effective_date: None,
            grace_period_end: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Raw row used for Diesel queries. The payment method stays as JSON and is
/// parsed into PaymentMethodInfo.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscribers)]
pub struct SubscriberRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscribed: bool,
    pub subscription_tier: Option<String>,
    pub subscription_status: String,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub preapproval_id: Option<String>,
    pub trial_active: bool,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub payment_method: Option<serde_json::Value>,
    pub last_payment_amount_minor: Option<i64>,
    pub last_payment_currency: Option<String>,
    pub last_payment_status: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub pending_plan_change: Option<String>,
    pub plan_change_effective_date: Option<DateTime<Utc>>,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriberRow> for SubscriberEntity {
    fn from(value: SubscriberRow) -> Self {
        let payment_method = value
            .payment_method
            .and_then(|raw| serde_json::from_value(raw).ok());

        Self {
            id: value.id,
            user_id: value.user_id,
            subscribed: value.subscribed,
            subscription_tier: value.subscription_tier,
            subscription_status: value.subscription_status,
            subscription_start: value.subscription_start,
            subscription_end: value.subscription_end,
            cancel_at_period_end: value.cancel_at_period_end,
            preapproval_id: value.preapproval_id,
            trial_active: value.trial_active,
            trial_start: value.trial_start,
            trial_end: value.trial_end,
            payment_method,
            last_payment_amount_minor: value.last_payment_amount_minor,
            last_payment_currency: value.last_payment_currency,
            last_payment_status: value.last_payment_status,
            last_payment_date: value.last_payment_date,
            pending_plan_change: value.pending_plan_change,
            plan_change_effective_date: value.plan_change_effective_date,
            grace_period_end: value.grace_period_end,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

/// Most recent provider payment observed for the user.
#[derive(Debug, Clone)]
pub struct LastPayment {
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: DateTime<Utc>,
    pub method: Option<PaymentMethodInfo>,
}

/// Everything a subscription activation writes in one pass.
#[derive(Debug, Clone)]
pub struct SubscriptionActivation {
    pub tier: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub preapproval_id: Option<String>,
    pub last_payment: Option<LastPayment>,
}
