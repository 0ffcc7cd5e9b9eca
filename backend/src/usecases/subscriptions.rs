use std::sync::Arc;

use anyhow::{Result as AnyResult, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use crates::{
    cache::{self, TtlCache},
    clock::Clock,
    domain::{
        entities::{
            analytics_events::NewAnalyticsEventEntity,
            subscribers::SubscriberEntity,
        },
        repositories::{
            analytics_events::AnalyticsEventRepository, subscribers::SubscriberRepository,
        },
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus,
            plans::{self, Proration, SubscriptionPlan, prorate},
            subscriptions::{SubscriptionData, TrialData},
        },
    },
    payments::provider_client::{
        ChargeOutcome, ChargeRequest, CheckoutPreapproval, CheckoutRequest, PaymentDetails,
        PaymentProviderClient, PreapprovalDetails,
    },
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::usecases::entitlement::{EntitlementInput, effective_subscription, resolve_access};

/// How long a subscriber snapshot may be served from cache before the next
/// reconciliation re-reads the database.
pub const SUBSCRIPTION_CACHE_TTL_SECS: i64 = 60;

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ProviderGateway: Send + Sync {
    async fn get_payment(&self, payment_id: &str) -> AnyResult<PaymentDetails>;

    async fn get_preapproval(&self, preapproval_id: &str) -> AnyResult<PreapprovalDetails>;

    async fn create_preapproval(&self, request: CheckoutRequest) -> AnyResult<CheckoutPreapproval>;

    async fn cancel_preapproval(&self, preapproval_id: &str) -> AnyResult<()>;

    async fn charge_payment(&self, request: ChargeRequest) -> AnyResult<ChargeOutcome>;

    async fn refund_payment(&self, reference: &str, amount_minor: i64) -> AnyResult<()>;
}

#[async_trait]
impl ProviderGateway for PaymentProviderClient {
    async fn get_payment(&self, payment_id: &str) -> AnyResult<PaymentDetails> {
        Ok(self.get_payment(payment_id).await?)
    }

    async fn get_preapproval(&self, preapproval_id: &str) -> AnyResult<PreapprovalDetails> {
        Ok(self.get_preapproval(preapproval_id).await?)
    }

    async fn create_preapproval(&self, request: CheckoutRequest) -> AnyResult<CheckoutPreapproval> {
        Ok(self.create_preapproval(&request).await?)
    }

    async fn cancel_preapproval(&self, preapproval_id: &str) -> AnyResult<()> {
        Ok(self.cancel_preapproval(preapproval_id).await?)
    }

    async fn charge_payment(&self, request: ChargeRequest) -> AnyResult<ChargeOutcome> {
        Ok(self.charge_payment(&request).await?)
    }

    async fn refund_payment(&self, reference: &str, amount_minor: i64) -> AnyResult<()> {
        Ok(self.refund_payment(reference, amount_minor).await?)
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("plan not found")]
    InvalidPlan,
    #[error("already subscribed to this plan")]
    SamePlan,
    #[error("trial already used")]
    TrialAlreadyUsed,
    #[error("user email is required for checkout")]
    MissingEmail,
    #[error("no active subscription")]
    SubscriptionNotFound,
    #[error("payment provider error: {0}")]
    Provider(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::InvalidPlan => StatusCode::NOT_FOUND,
            SubscriptionError::SamePlan | SubscriptionError::MissingEmail => {
                StatusCode::BAD_REQUEST
            }
            SubscriptionError::TrialAlreadyUsed => StatusCode::CONFLICT,
            SubscriptionError::SubscriptionNotFound => StatusCode::NOT_FOUND,
            SubscriptionError::Provider(_) => StatusCode::BAD_GATEWAY,
            SubscriptionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Checkout/cancel surfaces the provider's raw message; internal detail
    /// is never leaked.
    pub fn client_message(&self) -> String {
        match self {
            SubscriptionError::Provider(err) => err.to_string(),
            SubscriptionError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub url: String,
    pub plan: SubscriptionPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanChangeOutcome {
    pub applied_immediately: bool,
    pub proration: Option<Proration>,
    pub effective_date: Option<DateTime<Utc>>,
}

/// True while the paid subscription grants access: active or retrying, in
/// its grace window after exhausted retries, or cancelled but still inside
/// the paid-up period.
pub fn has_paid_subscription(record: &SubscriberEntity, now: DateTime<Utc>) -> bool {
    if !record.subscribed {
        return false;
    }
    match SubscriptionStatus::from_str(&record.subscription_status) {
        SubscriptionStatus::Active | SubscriptionStatus::PaymentPending => true,
        SubscriptionStatus::PastDue => record.grace_period_end.is_some_and(|end| end > now),
        SubscriptionStatus::Cancelled => {
            record.cancel_at_period_end && record.subscription_end.is_some_and(|end| end > now)
        }
    }
}

pub struct SubscriptionUseCase<Sub, Analytics, Provider>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    subscriber_repo: Arc<Sub>,
    analytics_repo: Arc<Analytics>,
    provider: Arc<Provider>,
    cache: Arc<TtlCache>,
    clock: Arc<dyn Clock>,
    callback_base_url: String,
}

impl<Sub, Analytics, Provider> SubscriptionUseCase<Sub, Analytics, Provider>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    pub fn new(
        subscriber_repo: Arc<Sub>,
        analytics_repo: Arc<Analytics>,
        provider: Arc<Provider>,
        cache: Arc<TtlCache>,
        clock: Arc<dyn Clock>,
        callback_base_url: String,
    ) -> Self {
        Self {
            subscriber_repo,
            analytics_repo,
            provider,
            cache,
            clock,
            callback_base_url,
        }
    }

    /// Client-triggered reconciliation: cache or subscriber record, trial
    /// sanitation, then the pure entitlement resolver.
    pub async fn check_subscription(
        &self,
        user_id: Uuid,
        is_admin: bool,
        current_page: Option<&str>,
    ) -> UseCaseResult<SubscriptionData> {
        let now = self.clock.now();
        let cache_key = cache::subscription_key(user_id);

        let cached = self
            .cache
            .get(&cache_key)
            .and_then(|raw| serde_json::from_value::<SubscriberEntity>(raw).ok());

        let record = match cached {
            Some(record) => Some(record),
            None => {
                let loaded = self
                    .subscriber_repo
                    .find_by_user_id(user_id)
                    .await
                    .map_err(|err| {
                        error!(
                            %user_id,
                            db_error = ?err,
                            "subscriptions: failed to load subscriber record"
                        );
                        SubscriptionError::Internal(err)
                    })?;
                if let Some(record) = &loaded {
                    if let Ok(raw) = serde_json::to_value(record) {
                        self.cache
                            .set(&cache_key, raw, Duration::seconds(SUBSCRIPTION_CACHE_TTL_SECS));
                    }
                }
                loaded
            }
        };

        let Some(record) = record else {
            info!(%user_id, "subscriptions: no subscriber record, resolving without history");
            let verdict = resolve_access(EntitlementInput {
                is_admin,
                current_page,
                ..Default::default()
            });
            let mut data = SubscriptionData::no_access();
            data.access_level = verdict.as_str().to_string();
            return Ok(data);
        };

        if TrialData::is_inconsistent(&record) {
            warn!(
                %user_id,
                "subscriptions: trial marked active without an end date, treating as active"
            );
        }

        let trial = TrialData::derive(&record, now);
        let has_paid = has_paid_subscription(&record, now);
        let verdict = resolve_access(EntitlementInput {
            is_admin,
            trial_active: trial.trial_active,
            has_paid_subscription: has_paid,
            trial_history_exists: trial.history_exists(),
            current_page,
        });

        info!(
            %user_id,
            access_level = %verdict,
            has_paid,
            trial_active = trial.trial_active,
            "subscriptions: entitlement resolved"
        );

        Ok(SubscriptionData {
            subscribed: record.subscribed,
            subscription_tier: record.subscription_tier.clone(),
            subscription_start: record.subscription_start,
            subscription_end: record.subscription_end,
            subscription_status: record.subscription_status.clone(),
            cancel_at_period_end: record.cancel_at_period_end,
            trial_active: trial.trial_active,
            trial_start: trial.trial_start,
            trial_end: trial.trial_end,
            trial_days_remaining: trial.trial_days_remaining,
            access_level: verdict.as_str().to_string(),
            effective_subscription: effective_subscription(trial.trial_active, has_paid),
            has_paid_subscription: has_paid,
            payment_method: record.payment_method,
            last_payment_amount_minor: record.last_payment_amount_minor,
            last_payment_currency: record.last_payment_currency,
            last_payment_status: record.last_payment_status,
            last_payment_date: record.last_payment_date,
        })
    }

    pub async fn start_trial(&self, user_id: Uuid) -> UseCaseResult<TrialData> {
        let record = self
            .subscriber_repo
            .find_by_user_id(user_id)
            .await
            .map_err(SubscriptionError::Internal)?;

        if record.is_some_and(|r| r.trial_start.is_some()) {
            let err = SubscriptionError::TrialAlreadyUsed;
            warn!(
                %user_id,
                status = err.status_code().as_u16(),
                "subscriptions: trial already used"
            );
            return Err(err);
        }

        let plan = plans::get_plan(plans::PREMIUM_MONTHLY).ok_or(SubscriptionError::InvalidPlan)?;
        let now = self.clock.now();
        let trial_end = now + Duration::days(plan.trial_days);

        self.subscriber_repo
            .start_trial(user_id, now, trial_end)
            .await
            .map_err(SubscriptionError::Internal)?;
        self.cache.invalidate(&cache::subscription_key(user_id));

        self.record_analytics(Some(user_id), "trial_started", json!({"trial_end": trial_end}))
            .await;

        info!(%user_id, %trial_end, "subscriptions: trial started");

        Ok(TrialData {
            trial_active: true,
            trial_start: Some(now),
            trial_end: Some(trial_end),
            trial_days_remaining: plan.trial_days,
        })
    }

    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        user_email: Option<String>,
        plan_id: &str,
    ) -> UseCaseResult<CheckoutOutcome> {
        let email = match user_email {
            Some(value) => value,
            None => {
                let err = SubscriptionError::MissingEmail;
                warn!(
                    %user_id,
                    plan_id,
                    status = err.status_code().as_u16(),
                    "subscriptions: missing email for checkout"
                );
                return Err(err);
            }
        };

        let plan = plans::get_plan(plan_id).ok_or_else(|| {
            let err = SubscriptionError::InvalidPlan;
            warn!(
                %user_id,
                plan_id,
                status = err.status_code().as_u16(),
                "subscriptions: unknown plan requested for checkout"
            );
            err
        })?;

        let request = CheckoutRequest {
            user_id,
            plan_id: plan.id.to_string(),
            amount_minor: plan.amount_minor,
            currency: plan.currency.to_string(),
            frequency: plan.frequency,
            frequency_type: plan.frequency_type.to_string(),
            payer_email: email,
            back_url: format!("{}/subscription/return", self.callback_base_url),
        };

        info!(%user_id, plan_id, "subscriptions: creating provider checkout");
        let checkout = self
            .provider
            .create_preapproval(request)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    plan_id,
                    error = ?err,
                    "subscriptions: provider checkout creation failed"
                );
                SubscriptionError::Provider(err)
            })?;

        self.record_analytics(
            Some(user_id),
            "checkout_created",
            json!({"plan_id": plan.id, "preapproval_id": checkout.id}),
        )
        .await;

        Ok(CheckoutOutcome {
            url: checkout.init_point,
            plan: *plan,
        })
    }

    pub async fn cancel_subscription(&self, user_id: Uuid) -> UseCaseResult<()> {
        let record = self
            .subscriber_repo
            .find_by_user_id(user_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or_else(|| {
                let err = SubscriptionError::SubscriptionNotFound;
                warn!(
                    %user_id,
                    status = err.status_code().as_u16(),
                    "subscriptions: no subscriber record to cancel"
                );
                err
            })?;

        let preapproval_id = record.preapproval_id.clone().ok_or_else(|| {
            let err = SubscriptionError::SubscriptionNotFound;
            warn!(
                %user_id,
                status = err.status_code().as_u16(),
                "subscriptions: subscriber has no provider mandate to cancel"
            );
            err
        })?;

        info!(%user_id, %preapproval_id, "subscriptions: cancelling provider mandate");
        self.provider
            .cancel_preapproval(&preapproval_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %preapproval_id,
                    error = ?err,
                    "subscriptions: provider cancellation failed"
                );
                SubscriptionError::Provider(err)
            })?;

        self.subscriber_repo
            .set_cancel_at_period_end(user_id, true)
            .await
            .map_err(SubscriptionError::Internal)?;

        self.cache.invalidate(&cache::subscription_key(user_id));
        self.cache.invalidate(&cache::preapproval_key(user_id));

        self.record_analytics(
            Some(user_id),
            "subscription_cancelled",
            json!({"preapproval_id": preapproval_id}),
        )
        .await;

        Ok(())
    }

    /// Immediate changes are prorated (upgrade charges before the switch
    /// commits, downgrade refunds); scheduled changes are stored and applied
    /// by the sweep at the billing boundary.
    pub async fn change_plan(
        &self,
        user_id: Uuid,
        new_plan_id: &str,
        immediate: bool,
    ) -> UseCaseResult<PlanChangeOutcome> {
        let new_plan = plans::get_plan(new_plan_id).ok_or_else(|| {
            let err = SubscriptionError::InvalidPlan;
            warn!(
                %user_id,
                new_plan_id,
                status = err.status_code().as_u16(),
                "subscriptions: unknown plan requested for change"
            );
            err
        })?;

        let now = self.clock.now();
        let record = self
            .subscriber_repo
            .find_by_user_id(user_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .filter(|record| has_paid_subscription(record, now))
            .ok_or_else(|| {
                let err = SubscriptionError::SubscriptionNotFound;
                warn!(
                    %user_id,
                    status = err.status_code().as_u16(),
                    "subscriptions: no paid subscription to change"
                );
                err
            })?;

        let current_tier = record
            .subscription_tier
            .as_deref()
            .unwrap_or(plans::PREMIUM_MONTHLY);
        let current_plan = match plans::get_plan(current_tier) {
            Some(plan) => plan,
            None => {
                warn!(
                    %user_id,
                    current_tier,
                    "subscriptions: record carries unknown plan id, assuming monthly"
                );
                plans::get_plan(plans::PREMIUM_MONTHLY).ok_or(SubscriptionError::InvalidPlan)?
            }
        };

        if new_plan.id == current_plan.id {
            return Err(SubscriptionError::SamePlan);
        }

        if !immediate {
            let effective_date = record.subscription_end.unwrap_or(now);
            self.subscriber_repo
                .set_pending_plan_change(user_id, new_plan.id.to_string(), effective_date)
                .await
                .map_err(SubscriptionError::Internal)?;
            self.cache.invalidate(&cache::subscription_key(user_id));

            self.record_analytics(
                Some(user_id),
                "plan_change_scheduled",
                json!({
                    "from": current_plan.id,
                    "to": new_plan.id,
                    "effective_date": effective_date,
                }),
            )
            .await;

            return Ok(PlanChangeOutcome {
                applied_immediately: false,
                proration: None,
                effective_date: Some(effective_date),
            });
        }

        let billing_start = record.subscription_start.unwrap_or(now);
        let billing_end = record.subscription_end.unwrap_or_else(|| {
            billing_start
                .checked_add_months(Months::new(current_plan.billing_cycle_months()))
                .unwrap_or(billing_start)
        });
        let proration = prorate(
            current_plan.amount_minor,
            new_plan.amount_minor,
            billing_start,
            billing_end,
            now,
        );

        if proration.net_minor > 0 {
            // The upgrade charge has to clear before the switch commits.
            let outcome = self
                .provider
                .charge_payment(ChargeRequest {
                    user_id,
                    preapproval_id: record.preapproval_id.clone(),
                    amount_minor: proration.net_minor,
                    currency: new_plan.currency.to_string(),
                    reference: format!("plan change to {}", new_plan.id),
                })
                .await
                .map_err(|err| {
                    error!(
                        %user_id,
                        net_minor = proration.net_minor,
                        error = ?err,
                        "subscriptions: proration charge failed"
                    );
                    SubscriptionError::Provider(err)
                })?;

            if !outcome.is_approved() {
                return Err(SubscriptionError::Provider(anyhow!(
                    "proration charge was {}",
                    outcome.status
                )));
            }
        } else if proration.net_minor < 0 {
            let reference = record.preapproval_id.clone().ok_or_else(|| {
                warn!(%user_id, "subscriptions: no provider mandate to refund against");
                SubscriptionError::SubscriptionNotFound
            })?;
            self.provider
                .refund_payment(&reference, -proration.net_minor)
                .await
                .map_err(|err| {
                    error!(
                        %user_id,
                        refund_minor = -proration.net_minor,
                        error = ?err,
                        "subscriptions: proration refund failed"
                    );
                    SubscriptionError::Provider(err)
                })?;
        }

        self.subscriber_repo
            .apply_plan_change(user_id, new_plan.id.to_string())
            .await
            .map_err(SubscriptionError::Internal)?;
        self.cache.invalidate(&cache::subscription_key(user_id));

        self.record_analytics(
            Some(user_id),
            "plan_changed",
            json!({
                "from": current_plan.id,
                "to": new_plan.id,
                "net_minor": proration.net_minor,
            }),
        )
        .await;

        info!(
            %user_id,
            from = current_plan.id,
            to = new_plan.id,
            net_minor = proration.net_minor,
            "subscriptions: plan changed immediately"
        );

        Ok(PlanChangeOutcome {
            applied_immediately: true,
            proration: Some(proration),
            effective_date: None,
        })
    }

    /// Sweep entry point: applies stored plan changes whose effective date
    /// has passed. Per-record failures are logged and skipped so one bad row
    /// never stalls the rest.
    pub async fn process_pending_plan_changes(&self) -> UseCaseResult<usize> {
        let now = self.clock.now();
        let due = self
            .subscriber_repo
            .find_due_plan_changes(now)
            .await
            .map_err(SubscriptionError::Internal)?;

        let mut applied = 0;
        for record in due {
            let Some(plan_id) = record.pending_plan_change.clone() else {
                continue;
            };

            let plan_id = if plans::get_plan(&plan_id).is_some() {
                plan_id
            } else {
                // Clears the stale marker by re-applying the current tier.
                warn!(
                    user_id = %record.user_id,
                    plan_id,
                    "subscriptions: pending change references unknown plan, clearing"
                );
                record
                    .subscription_tier
                    .clone()
                    .unwrap_or_else(|| plans::PREMIUM_MONTHLY.to_string())
            };

            if let Err(err) = self
                .subscriber_repo
                .apply_plan_change(record.user_id, plan_id.clone())
                .await
            {
                error!(
                    user_id = %record.user_id,
                    plan_id,
                    db_error = ?err,
                    "subscriptions: failed to apply pending plan change"
                );
                continue;
            }

            self.cache
                .invalidate(&cache::subscription_key(record.user_id));
            self.record_analytics(
                Some(record.user_id),
                "plan_change_applied",
                json!({"plan_id": plan_id}),
            )
            .await;
            applied += 1;
        }

        if applied > 0 {
            info!(applied, "subscriptions: pending plan changes applied");
        }
        Ok(applied)
    }

    // The analytics table is a write-only sink; a failed insert never fails
    // the calling operation.
    async fn record_analytics(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        payload: serde_json::Value,
    ) {
        let event = NewAnalyticsEventEntity {
            user_id,
            event_type: event_type.to_string(),
            payload,
        };
        if let Err(err) = self.analytics_repo.record_event(event).await {
            warn!(event_type, db_error = ?err, "subscriptions: analytics write failed");
        }
    }
}
