use std::sync::Arc;

use anyhow::Result as AnyResult;
use chrono::{DateTime, Duration, Utc};
use crates::{
    cache::{self, TtlCache},
    clock::Clock,
    domain::{
        entities::{
            payment_failures::{NewPaymentFailureEntity, PaymentFailureEntity},
            subscribers::LastPayment,
            user_notifications::NewUserNotificationEntity,
        },
        repositories::{
            payment_failures::PaymentFailureRepository, subscribers::SubscriberRepository,
            user_notifications::UserNotificationRepository,
        },
        value_objects::enums::{
            payment_statuses::PaymentStatus, subscription_statuses::SubscriptionStatus,
        },
    },
    payments::provider_client::ChargeRequest,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::usecases::subscriptions::ProviderGateway;

/// Failure reasons that never recover on retry.
pub const PERMANENT_FAILURE_REASONS: [&str; 4] = [
    "card_expired",
    "invalid_card",
    "card_declined_permanent",
    "fraudulent",
];

#[derive(Debug, Clone)]
pub struct DunningConfig {
    pub max_retry_attempts: i32,
    pub retry_intervals_days: Vec<i64>,
    pub grace_period_days: i64,
}

impl Default for DunningConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_intervals_days: vec![3, 7, 14],
            grace_period_days: 7,
        }
    }
}

/// One failed charge, as reported by the webhook handler or the retry sweep.
#[derive(Debug, Clone)]
pub struct PaymentFailureInput {
    pub user_id: Uuid,
    pub payment_id: String,
    pub subscription_id: Option<String>,
    pub failure_reason: String,
    pub failure_code: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub attempt_number: i32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RetrySweepSummary {
    pub recovered: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct DunningUseCase<Sub, Fail, Notif, Provider>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Fail: PaymentFailureRepository + Send + Sync + 'static,
    Notif: UserNotificationRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    subscriber_repo: Arc<Sub>,
    failure_repo: Arc<Fail>,
    notification_repo: Arc<Notif>,
    provider: Arc<Provider>,
    cache: Arc<TtlCache>,
    clock: Arc<dyn Clock>,
    config: DunningConfig,
}

impl<Sub, Fail, Notif, Provider> DunningUseCase<Sub, Fail, Notif, Provider>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Fail: PaymentFailureRepository + Send + Sync + 'static,
    Notif: UserNotificationRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    pub fn new(
        subscriber_repo: Arc<Sub>,
        failure_repo: Arc<Fail>,
        notification_repo: Arc<Notif>,
        provider: Arc<Provider>,
        cache: Arc<TtlCache>,
        clock: Arc<dyn Clock>,
        config: DunningConfig,
    ) -> Self {
        Self {
            subscriber_repo,
            failure_repo,
            notification_repo,
            provider,
            cache,
            clock,
            config,
        }
    }

    pub fn should_retry(&self, failure: &PaymentFailureInput) -> bool {
        if failure.attempt_number >= self.config.max_retry_attempts {
            return false;
        }
        !PERMANENT_FAILURE_REASONS.contains(&failure.failure_reason.as_str())
    }

    /// `payment_pending` while retries remain, `past_due` once exhausted,
    /// `active` outside any failure context.
    pub fn status_for_attempt(&self, attempt_number: i32) -> SubscriptionStatus {
        if attempt_number == 0 {
            SubscriptionStatus::Active
        } else if attempt_number < self.config.max_retry_attempts {
            SubscriptionStatus::PaymentPending
        } else {
            SubscriptionStatus::PastDue
        }
    }

    fn retry_interval_days(&self, attempt_number: i32) -> i64 {
        let last = self.config.retry_intervals_days.len() - 1;
        let idx = usize::try_from(attempt_number - 1).unwrap_or(0).min(last);
        self.config.retry_intervals_days[idx]
    }

    /// Records the failure, then either schedules the next retry or
    /// escalates. The failure row is persisted before any retry decision so
    /// a crash mid-processing is recoverable by the next sweep.
    pub async fn handle_payment_failure(&self, failure: PaymentFailureInput) -> AnyResult<()> {
        let now = self.clock.now();
        let retry = self.should_retry(&failure);
        let next_retry_date =
            retry.then(|| now + Duration::days(self.retry_interval_days(failure.attempt_number)));

        self.failure_repo
            .record_failure(NewPaymentFailureEntity {
                user_id: failure.user_id,
                payment_id: failure.payment_id.clone(),
                subscription_id: failure.subscription_id.clone(),
                failure_reason: failure.failure_reason.clone(),
                failure_code: failure.failure_code.clone(),
                amount_minor: failure.amount_minor,
                currency: failure.currency.clone(),
                attempt_number: failure.attempt_number,
                max_retry_attempts: self.config.max_retry_attempts,
                next_retry_date,
            })
            .await?;

        info!(
            user_id = %failure.user_id,
            payment_id = %failure.payment_id,
            attempt_number = failure.attempt_number,
            failure_reason = %failure.failure_reason,
            retry,
            "dunning: payment failure recorded"
        );

        if retry {
            self.subscriber_repo
                .update_subscription_status(
                    failure.user_id,
                    self.status_for_attempt(failure.attempt_number),
                )
                .await?;
            self.cache
                .invalidate(&cache::subscription_key(failure.user_id));
            self.notify(&failure, next_retry_date, None).await?;
        } else {
            self.handle_max_retries_reached(&failure).await?;
        }

        Ok(())
    }

    /// Demotes the subscription to past_due and opens the grace window.
    pub async fn handle_max_retries_reached(
        &self,
        failure: &PaymentFailureInput,
    ) -> AnyResult<()> {
        let now = self.clock.now();
        let grace_period_end = now + Duration::days(self.config.grace_period_days);

        self.subscriber_repo
            .update_subscription_status(failure.user_id, SubscriptionStatus::PastDue)
            .await?;
        self.subscriber_repo
            .set_grace_period(failure.user_id, Some(grace_period_end))
            .await?;
        self.cache
            .invalidate(&cache::subscription_key(failure.user_id));
        self.notify(failure, None, Some(grace_period_end)).await?;

        warn!(
            user_id = %failure.user_id,
            payment_id = %failure.payment_id,
            %grace_period_end,
            "dunning: retries exhausted, subscription past due"
        );

        Ok(())
    }

    /// Template selection by attempt: first failure, interim retry, final.
    async fn notify(
        &self,
        failure: &PaymentFailureInput,
        next_retry_date: Option<DateTime<Utc>>,
        grace_period_end: Option<DateTime<Utc>>,
    ) -> AnyResult<()> {
        let amount = format_amount(failure.amount_minor, &failure.currency);

        let (kind, title, body) = match next_retry_date {
            Some(retry_date) if failure.attempt_number <= 1 => (
                "payment_failed_first",
                "We could not process your payment".to_string(),
                format!(
                    "Your payment of {} did not go through. We will retry automatically on {}.",
                    amount,
                    format_date(retry_date)
                ),
            ),
            Some(retry_date) => (
                "payment_retry_scheduled",
                "Your payment failed again".to_string(),
                format!(
                    "We still could not process your payment of {}. The next attempt is scheduled for {}.",
                    amount,
                    format_date(retry_date)
                ),
            ),
            None => (
                "payment_failed_final",
                "Your subscription is at risk".to_string(),
                match grace_period_end {
                    Some(grace_end) => format!(
                        "We were unable to collect your payment of {}. Please update your payment method before {} to keep access.",
                        amount,
                        format_date(grace_end)
                    ),
                    None => format!(
                        "We were unable to collect your payment of {}. Please update your payment method to keep access.",
                        amount
                    ),
                },
            ),
        };

        self.notification_repo
            .create_notification(NewUserNotificationEntity {
                user_id: failure.user_id,
                kind: kind.to_string(),
                title,
                body,
            })
            .await?;

        Ok(())
    }

    /// Scheduled sweep: charges every due retry strictly sequentially (the
    /// provider rate-limits bursts), claiming each failure before charging.
    pub async fn process_retry_payments(&self) -> AnyResult<RetrySweepSummary> {
        let now = self.clock.now();
        let due = self.failure_repo.find_due_retries(now).await?;

        if !due.is_empty() {
            info!(due = due.len(), "dunning: processing due payment retries");
        }

        let mut summary = RetrySweepSummary::default();
        for failure in due {
            if !self.failure_repo.claim_for_retry(failure.id, now).await? {
                summary.skipped += 1;
                continue;
            }

            let request = ChargeRequest {
                user_id: failure.user_id,
                preapproval_id: failure.subscription_id.clone(),
                amount_minor: failure.amount_minor,
                currency: failure.currency.clone(),
                reference: failure.payment_id.clone(),
            };

            match self.provider.charge_payment(request).await {
                Ok(outcome) if outcome.is_approved() => {
                    if let Err(err) = self.recover(&failure, &outcome.id).await {
                        error!(
                            user_id = %failure.user_id,
                            failure_id = %failure.id,
                            error = ?err,
                            "dunning: recovery bookkeeping failed"
                        );
                    }
                    summary.recovered += 1;
                }
                Ok(outcome) => {
                    let reason = outcome
                        .status_detail
                        .unwrap_or_else(|| outcome.status.clone());
                    self.reenter(&failure, outcome.id, reason, None).await;
                    summary.failed += 1;
                }
                Err(err) => {
                    error!(
                        user_id = %failure.user_id,
                        failure_id = %failure.id,
                        error = ?err,
                        "dunning: retry charge could not reach the provider"
                    );
                    self.reenter(
                        &failure,
                        failure.payment_id.clone(),
                        "provider_unavailable".to_string(),
                        None,
                    )
                    .await;
                    summary.failed += 1;
                }
            }
        }

        info!(
            recovered = summary.recovered,
            failed = summary.failed,
            skipped = summary.skipped,
            "dunning: retry sweep finished"
        );

        Ok(summary)
    }

    // A failed retry re-enters the failure path with the attempt count
    // bumped; errors here are logged, never dropped silently.
    async fn reenter(
        &self,
        failure: &PaymentFailureEntity,
        payment_id: String,
        failure_reason: String,
        failure_code: Option<String>,
    ) {
        let input = PaymentFailureInput {
            user_id: failure.user_id,
            payment_id,
            subscription_id: failure.subscription_id.clone(),
            failure_reason,
            failure_code,
            amount_minor: failure.amount_minor,
            currency: failure.currency.clone(),
            attempt_number: failure.attempt_number + 1,
        };

        if let Err(err) = self.handle_payment_failure(input).await {
            error!(
                user_id = %failure.user_id,
                failure_id = %failure.id,
                error = ?err,
                "dunning: failed to record follow-up failure"
            );
        }
    }

    async fn recover(&self, failure: &PaymentFailureEntity, payment_id: &str) -> AnyResult<()> {
        let now = self.clock.now();

        self.failure_repo
            .resolve_for_user(failure.user_id, now)
            .await?;
        self.subscriber_repo
            .update_subscription_status(failure.user_id, SubscriptionStatus::Active)
            .await?;
        self.subscriber_repo
            .set_grace_period(failure.user_id, None)
            .await?;
        self.subscriber_repo
            .record_last_payment(
                failure.user_id,
                LastPayment {
                    amount_minor: failure.amount_minor,
                    currency: failure.currency.clone(),
                    status: PaymentStatus::Approved.to_string(),
                    paid_at: now,
                    method: None,
                },
            )
            .await?;
        self.cache
            .invalidate(&cache::subscription_key(failure.user_id));

        info!(
            user_id = %failure.user_id,
            payment_id,
            "dunning: payment recovered, subscription active again"
        );

        Ok(())
    }
}

fn format_amount(amount_minor: i64, currency: &str) -> String {
    format!("{}.{:02} {}", amount_minor / 100, amount_minor % 100, currency)
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%B %-d, %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crates::clock::MockClock;
    use crates::domain::repositories::payment_failures::MockPaymentFailureRepository;
    use crates::domain::repositories::subscribers::MockSubscriberRepository;
    use crates::domain::repositories::user_notifications::MockUserNotificationRepository;
    use crates::payments::provider_client::ChargeOutcome;
    use crate::usecases::subscriptions::MockProviderGateway;
    use mockall::predicate::eq;
    use std::sync::Mutex;

    fn fixed_clock(now: DateTime<Utc>) -> Arc<MockClock> {
        let mut clock = MockClock::new();
        clock.expect_now().returning(move || now);
        Arc::new(clock)
    }

    fn quiet_notifications() -> MockUserNotificationRepository {
        let mut repo = MockUserNotificationRepository::new();
        repo.expect_create_notification()
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));
        repo
    }

    fn usecase(
        subscriber_repo: MockSubscriberRepository,
        failure_repo: MockPaymentFailureRepository,
        notification_repo: MockUserNotificationRepository,
        provider: MockProviderGateway,
        now: DateTime<Utc>,
    ) -> DunningUseCase<
        MockSubscriberRepository,
        MockPaymentFailureRepository,
        MockUserNotificationRepository,
        MockProviderGateway,
    > {
        DunningUseCase::new(
            Arc::new(subscriber_repo),
            Arc::new(failure_repo),
            Arc::new(notification_repo),
            Arc::new(provider),
            Arc::new(TtlCache::new(fixed_clock(now))),
            fixed_clock(now),
            DunningConfig::default(),
        )
    }

    fn failure_input(user_id: Uuid, attempt_number: i32, reason: &str) -> PaymentFailureInput {
        PaymentFailureInput {
            user_id,
            payment_id: "pay_42".to_string(),
            subscription_id: Some("pre_42".to_string()),
            failure_reason: reason.to_string(),
            failure_code: None,
            amount_minor: 999,
            currency: "USD".to_string(),
            attempt_number,
        }
    }

    fn due_failure(user_id: Uuid, attempt_number: i32) -> PaymentFailureEntity {
        let now = Utc::now();
        PaymentFailureEntity {
            id: Uuid::new_v4(),
            user_id,
            payment_id: "pay_42".to_string(),
            subscription_id: Some("pre_42".to_string()),
            failure_reason: "cc_rejected_insufficient_amount".to_string(),
            failure_code: None,
            amount_minor: 999,
            currency: "USD".to_string(),
            attempt_number,
            max_retry_attempts: 3,
            next_retry_date: Some(now - Duration::hours(1)),
            processed_at: None,
            resolved_at: None,
            created_at: now - Duration::days(3),
        }
    }

    #[tokio::test]
    async fn transient_first_failure_schedules_a_retry_in_three_days() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let mut failure_repo = MockPaymentFailureRepository::new();
        failure_repo
            .expect_record_failure()
            .withf(move |failure| {
                failure.attempt_number == 1
                    && failure
                        .next_retry_date
                        .is_some_and(|date| (date - (now + Duration::days(3))).num_seconds().abs() < 2)
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let mut subscriber_repo = MockSubscriberRepository::new();
        subscriber_repo
            .expect_update_subscription_status()
            .with(eq(user_id), eq(SubscriptionStatus::PaymentPending))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = usecase(
            subscriber_repo,
            failure_repo,
            quiet_notifications(),
            MockProviderGateway::new(),
            now,
        );

        usecase
            .handle_payment_failure(failure_input(user_id, 1, "cc_rejected_insufficient_amount"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn later_attempts_use_longer_intervals_and_clamp_to_the_last() {
        let now = Utc::now();
        let usecase = usecase(
            MockSubscriberRepository::new(),
            MockPaymentFailureRepository::new(),
            MockUserNotificationRepository::new(),
            MockProviderGateway::new(),
            now,
        );

        assert_eq!(usecase.retry_interval_days(1), 3);
        assert_eq!(usecase.retry_interval_days(2), 7);
        assert_eq!(usecase.retry_interval_days(3), 14);
        assert_eq!(usecase.retry_interval_days(9), 14);
    }

    #[tokio::test]
    async fn permanent_failure_short_circuits_to_past_due() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let mut failure_repo = MockPaymentFailureRepository::new();
        failure_repo
            .expect_record_failure()
            .withf(|failure| failure.next_retry_date.is_none())
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let mut subscriber_repo = MockSubscriberRepository::new();
        subscriber_repo
            .expect_update_subscription_status()
            .with(eq(user_id), eq(SubscriptionStatus::PastDue))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        subscriber_repo
            .expect_set_grace_period()
            .withf(move |_, grace| {
                grace.is_some_and(|end| (end - (now + Duration::days(7))).num_seconds().abs() < 2)
            })
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = usecase(
            subscriber_repo,
            failure_repo,
            quiet_notifications(),
            MockProviderGateway::new(),
            now,
        );

        let input = failure_input(user_id, 1, "card_expired");
        assert!(!usecase.should_retry(&input));
        usecase.handle_payment_failure(input).await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_attempts_escalate_to_past_due_with_grace() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let mut failure_repo = MockPaymentFailureRepository::new();
        failure_repo
            .expect_record_failure()
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let mut subscriber_repo = MockSubscriberRepository::new();
        subscriber_repo
            .expect_update_subscription_status()
            .with(eq(user_id), eq(SubscriptionStatus::PastDue))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        subscriber_repo
            .expect_set_grace_period()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = usecase(
            subscriber_repo,
            failure_repo,
            quiet_notifications(),
            MockProviderGateway::new(),
            now,
        );

        usecase
            .handle_payment_failure(failure_input(user_id, 3, "cc_rejected_insufficient_amount"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_recovers_on_approved_charge() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let failure = due_failure(user_id, 1);

        let mut failure_repo = MockPaymentFailureRepository::new();
        let due = failure.clone();
        failure_repo
            .expect_find_due_retries()
            .returning(move |_| {
                let due = due.clone();
                Box::pin(async move { Ok(vec![due]) })
            });
        failure_repo
            .expect_claim_for_retry()
            .with(eq(failure.id), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(true) }));
        failure_repo
            .expect_resolve_for_user()
            .with(eq(user_id), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(1) }));

        let mut subscriber_repo = MockSubscriberRepository::new();
        subscriber_repo
            .expect_update_subscription_status()
            .with(eq(user_id), eq(SubscriptionStatus::Active))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        subscriber_repo
            .expect_set_grace_period()
            .with(eq(user_id), eq(None::<DateTime<Utc>>))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        subscriber_repo
            .expect_record_last_payment()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let mut provider = MockProviderGateway::new();
        provider.expect_charge_payment().times(1).returning(|_| {
            Box::pin(async {
                Ok(ChargeOutcome {
                    id: "pay_43".to_string(),
                    status: "approved".to_string(),
                    status_detail: None,
                })
            })
        });

        let usecase = usecase(
            subscriber_repo,
            failure_repo,
            MockUserNotificationRepository::new(),
            provider,
            now,
        );

        let summary = usecase.process_retry_payments().await.unwrap();
        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn sweep_reenters_failure_path_on_declined_charge() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let failure = due_failure(user_id, 1);

        let recorded = Arc::new(Mutex::new(Vec::new()));
        let recorded_handle = Arc::clone(&recorded);

        let mut failure_repo = MockPaymentFailureRepository::new();
        let due = failure.clone();
        failure_repo
            .expect_find_due_retries()
            .returning(move |_| {
                let due = due.clone();
                Box::pin(async move { Ok(vec![due]) })
            });
        failure_repo
            .expect_claim_for_retry()
            .returning(|_, _| Box::pin(async { Ok(true) }));
        failure_repo
            .expect_record_failure()
            .times(1)
            .returning(move |new_failure| {
                recorded_handle.lock().unwrap().push(new_failure.attempt_number);
                Box::pin(async { Ok(Uuid::new_v4()) })
            });

        let mut subscriber_repo = MockSubscriberRepository::new();
        subscriber_repo
            .expect_update_subscription_status()
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let mut provider = MockProviderGateway::new();
        provider.expect_charge_payment().returning(|_| {
            Box::pin(async {
                Ok(ChargeOutcome {
                    id: "pay_44".to_string(),
                    status: "rejected".to_string(),
                    status_detail: Some("cc_rejected_high_risk".to_string()),
                })
            })
        });

        let usecase = usecase(
            subscriber_repo,
            failure_repo,
            quiet_notifications(),
            provider,
            now,
        );

        let summary = usecase.process_retry_payments().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(*recorded.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn sweep_skips_failures_claimed_by_another_instance() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let failure = due_failure(user_id, 1);

        let mut failure_repo = MockPaymentFailureRepository::new();
        let due = failure.clone();
        failure_repo
            .expect_find_due_retries()
            .returning(move |_| {
                let due = due.clone();
                Box::pin(async move { Ok(vec![due]) })
            });
        failure_repo
            .expect_claim_for_retry()
            .returning(|_, _| Box::pin(async { Ok(false) }));

        let mut provider = MockProviderGateway::new();
        provider.expect_charge_payment().never();

        let usecase = usecase(
            MockSubscriberRepository::new(),
            failure_repo,
            MockUserNotificationRepository::new(),
            provider,
            now,
        );

        let summary = usecase.process_retry_payments().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.recovered, 0);
    }

    #[test]
    fn amounts_render_with_two_decimals() {
        assert_eq!(format_amount(999, "USD"), "9.99 USD");
        assert_eq!(format_amount(9900, "USD"), "99.00 USD");
        assert_eq!(format_amount(5, "USD"), "0.05 USD");
    }
}
