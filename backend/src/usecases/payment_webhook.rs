use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result as AnyResult, anyhow};
use chrono::{DateTime, Duration, Months, Utc};
use crates::{
    cache::{self, TtlCache},
    clock::Clock,
    domain::{
        entities::{
            analytics_events::NewAnalyticsEventEntity,
            subscribers::{LastPayment, PaymentMethodInfo, SubscriptionActivation},
        },
        repositories::{
            analytics_events::AnalyticsEventRepository,
            payment_failures::PaymentFailureRepository, subscribers::SubscriberRepository,
            user_notifications::UserNotificationRepository,
        },
        value_objects::{
            enums::payment_statuses::PaymentStatus,
            plans,
            webhooks::{WebhookEvent, WebhookParseError, verify_signature},
        },
    },
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::usecases::dunning::{DunningUseCase, PaymentFailureInput};
use crate::usecases::subscriptions::ProviderGateway;

/// Events older than this are treated as replays.
pub const MAX_EVENT_AGE_SECS: i64 = 5 * 60;
// The seen set is process-local; above this size it resets wholesale rather
// than growing unbounded.
const SEEN_EVENTS_MAX: usize = 10_000;
const RATE_LIMIT_WINDOW_SECS: i64 = 60;
const RATE_LIMIT_MAX_EVENTS: usize = 100;

#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error(transparent)]
    Parse(#[from] WebhookParseError),
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("event is {age_secs}s old, limit is {MAX_EVENT_AGE_SECS}s")]
    Stale { age_secs: i64 },
    #[error("event {event_id} already processed")]
    AlreadyProcessed { event_id: String },
    #[error("rate limit exceeded for {key}")]
    RateLimited { key: String },
}

#[derive(Debug)]
pub enum IngestOutcome {
    Handled { event_id: String },
    Rejected(WebhookRejection),
    /// Validation passed but handling failed; the provider still gets a 200
    /// and the event stays unmarked so a redelivery can succeed.
    HandlerError,
}

struct SeenEvents {
    ids: HashSet<String>,
}

impl SeenEvents {
    fn new() -> Self {
        Self {
            ids: HashSet::new(),
        }
    }

    fn contains(&self, event_id: &str) -> bool {
        self.ids.contains(event_id)
    }

    fn mark(&mut self, event_id: String) {
        if self.ids.len() >= SEEN_EVENTS_MAX {
            self.ids.clear();
        }
        self.ids.insert(event_id);
    }
}

pub struct ValidatedEvent {
    pub event: WebhookEvent,
    pub event_id: String,
}

pub struct WebhookUseCase<Sub, Analytics, Fail, Notif, Provider>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Fail: PaymentFailureRepository + Send + Sync + 'static,
    Notif: UserNotificationRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    subscriber_repo: Arc<Sub>,
    analytics_repo: Arc<Analytics>,
    dunning: Arc<DunningUseCase<Sub, Fail, Notif, Provider>>,
    provider: Arc<Provider>,
    cache: Arc<TtlCache>,
    clock: Arc<dyn Clock>,
    webhook_secret: Option<String>,
    seen_events: Mutex<SeenEvents>,
    rate_windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl<Sub, Analytics, Fail, Notif, Provider>
    WebhookUseCase<Sub, Analytics, Fail, Notif, Provider>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Fail: PaymentFailureRepository + Send + Sync + 'static,
    Notif: UserNotificationRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    pub fn new(
        subscriber_repo: Arc<Sub>,
        analytics_repo: Arc<Analytics>,
        dunning: Arc<DunningUseCase<Sub, Fail, Notif, Provider>>,
        provider: Arc<Provider>,
        cache: Arc<TtlCache>,
        clock: Arc<dyn Clock>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            subscriber_repo,
            analytics_repo,
            dunning,
            provider,
            cache,
            clock,
            webhook_secret,
            seen_events: Mutex::new(SeenEvents::new()),
            rate_windows: Mutex::new(HashMap::new()),
        }
    }

    /// Full ingestion: validate, dispatch by event type, mark seen only
    /// after successful handling. A rejected or failed event is still
    /// acknowledged with 200 by the router; nothing here is caller-visible
    /// failure.
    pub async fn ingest(&self, payload: &[u8], signature: Option<&str>) -> IngestOutcome {
        let validated = match self.validate(payload, signature) {
            Ok(validated) => validated,
            Err(rejection) => {
                warn!(error = %rejection, "webhook: event rejected");
                return IngestOutcome::Rejected(rejection);
            }
        };

        match self.handle_event(&validated.event).await {
            Ok(()) => {
                self.seen_events
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .mark(validated.event_id.clone());
                IngestOutcome::Handled {
                    event_id: validated.event_id,
                }
            }
            Err(err) => {
                error!(
                    event_id = %validated.event_id,
                    event_type = %validated.event.type_,
                    error = ?err,
                    "webhook: event handling failed"
                );
                IngestOutcome::HandlerError
            }
        }
    }

    /// Validation pipeline; each stage short-circuits. Order: parse,
    /// structure, signature, freshness, idempotency, rate limit.
    pub fn validate(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ValidatedEvent, WebhookRejection> {
        let event = WebhookEvent::parse(payload)?;

        if let Some(secret) = &self.webhook_secret {
            let provided = signature.unwrap_or_default();
            if !verify_signature(payload, secret, provided) {
                return Err(WebhookRejection::InvalidSignature);
            }
        }

        let age_secs = (self.clock.now() - event.date_created).num_seconds();
        if age_secs > MAX_EVENT_AGE_SECS {
            return Err(WebhookRejection::Stale { age_secs });
        }

        let event_id = event.event_id();
        if self
            .seen_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&event_id)
        {
            return Err(WebhookRejection::AlreadyProcessed { event_id });
        }

        self.enforce_rate_limit(&event)?;

        Ok(ValidatedEvent { event, event_id })
    }

    // Sliding 60-second window keyed by (type, data id).
    fn enforce_rate_limit(&self, event: &WebhookEvent) -> Result<(), WebhookRejection> {
        let key = format!("{}:{}", event.type_, event.data_id);
        let now = self.clock.now();

        let mut windows = self.rate_windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(key.clone()).or_default();
        while window
            .front()
            .is_some_and(|seen| now - *seen > Duration::seconds(RATE_LIMIT_WINDOW_SECS))
        {
            window.pop_front();
        }

        if window.len() >= RATE_LIMIT_MAX_EVENTS {
            return Err(WebhookRejection::RateLimited { key });
        }
        window.push_back(now);
        Ok(())
    }

    async fn handle_event(&self, event: &WebhookEvent) -> AnyResult<()> {
        match event.type_.as_str() {
            "payment" => self.handle_payment_event(event).await,
            "preapproval" => self.handle_preapproval_event(event).await,
            other => {
                debug!(event_type = other, "webhook: ignoring unhandled event type");
                Ok(())
            }
        }
    }

    async fn handle_payment_event(&self, event: &WebhookEvent) -> AnyResult<()> {
        let payment = self.provider.get_payment(&event.data_id).await?;

        let Some(user_id) = payment
            .external_reference
            .as_deref()
            .and_then(|reference| Uuid::parse_str(reference).ok())
        else {
            warn!(
                data_id = %event.data_id,
                "webhook: payment carries no usable external reference"
            );
            return Ok(());
        };

        let status = PaymentStatus::from_str(&payment.status);
        if status == PaymentStatus::Approved && payment.amount_minor > 0 {
            let record = self.subscriber_repo.find_by_user_id(user_id).await?;
            let now = self.clock.now();
            let plan = plans::find_plan_by_amount(payment.amount_minor)
                .or_else(|| plans::get_plan(plans::PREMIUM_MONTHLY))
                .ok_or_else(|| anyhow!("plan catalog is empty"))?;

            // Extends by one billing cycle from the current period end, or
            // from now when the period already lapsed.
            let starts_at = record
                .as_ref()
                .and_then(|r| r.subscription_start)
                .unwrap_or(now);
            let base = record
                .as_ref()
                .and_then(|r| r.subscription_end)
                .filter(|end| *end > now)
                .unwrap_or(now);
            let ends_at = base
                .checked_add_months(Months::new(plan.billing_cycle_months()))
                .ok_or_else(|| anyhow!("failed to compute subscription end date"))?;
            let preapproval_id = record.as_ref().and_then(|r| r.preapproval_id.clone());

            let method = payment.card.as_ref().map(|card| PaymentMethodInfo {
                method_type: payment.payment_method_type.clone(),
                brand: card.brand.clone(),
                last4: card.last4.clone(),
                exp_month: card.exp_month,
                exp_year: card.exp_year,
            });

            self.subscriber_repo
                .activate_subscription(
                    user_id,
                    SubscriptionActivation {
                        tier: plan.id.to_string(),
                        starts_at,
                        ends_at,
                        preapproval_id,
                        last_payment: Some(LastPayment {
                            amount_minor: payment.amount_minor,
                            currency: payment.currency.clone(),
                            status: payment.status.clone(),
                            paid_at: payment.date_approved.unwrap_or(now),
                            method,
                        }),
                    },
                )
                .await?;

            self.cache.invalidate(&cache::subscription_key(user_id));
            self.cache.invalidate(&cache::payment_key(user_id));

            info!(
                %user_id,
                payment_id = %payment.id,
                %ends_at,
                "webhook: payment approved, subscription extended"
            );
        } else if matches!(status, PaymentStatus::Rejected | PaymentStatus::Cancelled) {
            // The webhook itself mutates nothing; the dunning manager owns
            // the failure path.
            let record = self.subscriber_repo.find_by_user_id(user_id).await?;
            info!(
                %user_id,
                payment_id = %payment.id,
                status = %payment.status,
                "webhook: payment failed, entering dunning"
            );
            self.dunning
                .handle_payment_failure(PaymentFailureInput {
                    user_id,
                    payment_id: payment.id.clone(),
                    subscription_id: record.and_then(|r| r.preapproval_id),
                    failure_reason: payment
                        .status_detail
                        .clone()
                        .unwrap_or_else(|| payment.status.clone()),
                    failure_code: payment.status_detail.clone(),
                    amount_minor: payment.amount_minor,
                    currency: payment.currency.clone(),
                    attempt_number: 1,
                })
                .await?;
        } else {
            info!(
                payment_id = %payment.id,
                status = %payment.status,
                "webhook: payment status needs no action"
            );
        }

        self.record_analytics(
            Some(user_id),
            "webhook_payment",
            json!({
                "payment_id": payment.id,
                "status": payment.status,
                "amount_minor": payment.amount_minor,
            }),
        )
        .await;

        Ok(())
    }

    async fn handle_preapproval_event(&self, event: &WebhookEvent) -> AnyResult<()> {
        let preapproval = self.provider.get_preapproval(&event.data_id).await?;

        let Some(user_id) = preapproval
            .external_reference
            .as_deref()
            .and_then(|reference| Uuid::parse_str(reference).ok())
        else {
            warn!(
                data_id = %event.data_id,
                "webhook: preapproval carries no usable external reference"
            );
            return Ok(());
        };

        match preapproval.status.as_str() {
            "authorized" => {
                let now = self.clock.now();
                let plan = preapproval
                    .amount_minor
                    .and_then(plans::find_plan_by_amount)
                    .or_else(|| plans::get_plan(plans::PREMIUM_MONTHLY))
                    .ok_or_else(|| anyhow!("plan catalog is empty"))?;
                let ends_at = now
                    .checked_add_months(Months::new(plan.billing_cycle_months()))
                    .ok_or_else(|| anyhow!("failed to compute subscription end date"))?;

                self.subscriber_repo
                    .activate_subscription(
                        user_id,
                        SubscriptionActivation {
                            tier: plan.id.to_string(),
                            starts_at: now,
                            ends_at,
                            preapproval_id: Some(preapproval.id.clone()),
                            last_payment: None,
                        },
                    )
                    .await?;

                info!(
                    %user_id,
                    preapproval_id = %preapproval.id,
                    "webhook: preapproval authorized, subscription active"
                );
            }
            "cancelled" | "finished" => {
                self.subscriber_repo.clear_subscription(user_id).await?;
                info!(
                    %user_id,
                    preapproval_id = %preapproval.id,
                    status = %preapproval.status,
                    "webhook: preapproval ended, subscription cleared"
                );
            }
            other => {
                debug!(
                    preapproval_id = %preapproval.id,
                    status = other,
                    "webhook: preapproval status needs no action"
                );
            }
        }

        self.cache.invalidate(&cache::subscription_key(user_id));
        self.cache.invalidate(&cache::preapproval_key(user_id));

        self.record_analytics(
            Some(user_id),
            "webhook_preapproval",
            json!({
                "preapproval_id": preapproval.id,
                "status": preapproval.status,
            }),
        )
        .await;

        Ok(())
    }

    // Write-only sink; failures are logged, never propagated.
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
            warn!(event_type, db_error = ?err, "webhook: analytics write failed");
        }
    }
}
