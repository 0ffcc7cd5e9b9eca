use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::subscribers::{PaymentMethodInfo, SubscriberEntity};

/// Snapshot of a user's trial state, derived from the subscriber record.
/// `days_remaining` is always clamped to zero or above.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrialData {
    pub trial_active: bool,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub trial_days_remaining: i64,
}

impl TrialData {
    /// Derives trial state at `now`. A stored active flag with a missing end
    /// date is treated as active (the caller logs the inconsistency); an end
    /// date in the past deactivates the trial regardless of the flag.
    pub fn derive(record: &SubscriberEntity, now: DateTime<Utc>) -> Self {
        let trial_active = record.trial_active
            && match record.trial_end {
                Some(end) => end > now,
                None => true,
            };

        let trial_days_remaining = record
            .trial_end
            .map(|end| (end - now).num_days().max(0))
            .unwrap_or(0);

        Self {
            trial_active,
            trial_start: record.trial_start,
            trial_end: record.trial_end,
            trial_days_remaining,
        }
    }

    pub fn history_exists(&self) -> bool {
        self.trial_start.is_some()
    }

    /// True for the active-flag-without-end-date shape; logged upstream as a
    /// data consistency warning.
    pub fn is_inconsistent(record: &SubscriberEntity) -> bool {
        record.trial_active && record.trial_end.is_none()
    }
}

/// Reconciliation response consumed by the client's route guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionData {
    pub subscribed: bool,
    pub subscription_tier: Option<String>,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub subscription_status: String,
    pub cancel_at_period_end: bool,
    pub trial_active: bool,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub trial_days_remaining: i64,
    pub access_level: String,
    pub effective_subscription: bool,
    pub has_paid_subscription: bool,
    pub payment_method: Option<PaymentMethodInfo>,
    pub last_payment_amount_minor: Option<i64>,
    pub last_payment_currency: Option<String>,
    pub last_payment_status: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
}

impl SubscriptionData {
    /// The conservative no-access shape used both for users without a
    /// subscriber record and as the fail-closed fallback.
    pub fn no_access() -> Self {
        Self {
            subscribed: false,
            subscription_tier: None,
            subscription_start: None,
            subscription_end: None,
            subscription_status: String::new(),
            cancel_at_period_end: false,
            trial_active: false,
            trial_start: None,
            trial_end: None,
            trial_days_remaining: 0,
            access_level: "none".to_string(),
            effective_subscription: false,
            has_paid_subscription: false,
            payment_method: None,
            last_payment_amount_minor: None,
            last_payment_currency: None,
            last_payment_status: None,
            last_payment_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn subscriber_with_trial(
        trial_active: bool,
        trial_start: Option<DateTime<Utc>>,
        trial_end: Option<DateTime<Utc>>,
    ) -> SubscriberEntity {
        SubscriberEntity {
            trial_active,
            trial_start,
            trial_end,
            ..SubscriberEntity::blank(Uuid::new_v4())
        }
    }

    #[test]
    fn negative_days_remaining_clamp_to_zero() {
        let now = Utc::now();
        let record = subscriber_with_trial(
            false,
            Some(now - Duration::days(19)),
            Some(now - Duration::days(5)),
        );

        let trial = TrialData::derive(&record, now);

        assert!(!trial.trial_active);
        assert_eq!(trial.trial_days_remaining, 0);
    }

    #[test]
    fn expired_end_date_overrides_active_flag() {
        let now = Utc::now();
        let record = subscriber_with_trial(
            true,
            Some(now - Duration::days(20)),
            Some(now - Duration::days(1)),
        );

        let trial = TrialData::derive(&record, now);

        assert!(!trial.trial_active);
    }

    #[test]
    fn active_flag_without_end_date_stays_active_but_is_inconsistent() {
        let now = Utc::now();
        let record = subscriber_with_trial(true, Some(now - Duration::days(2)), None);

        let trial = TrialData::derive(&record, now);

        assert!(trial.trial_active);
        assert_eq!(trial.trial_days_remaining, 0);
        assert!(TrialData::is_inconsistent(&record));
    }

    #[test]
    fn trial_history_tracks_trial_start() {
        let now = Utc::now();
        let no_history = subscriber_with_trial(false, None, None);
        let with_history =
            subscriber_with_trial(false, Some(now - Duration::days(40)), Some(now - Duration::days(26)));

        assert!(!TrialData::derive(&no_history, now).history_exists());
        assert!(TrialData::derive(&with_history, now).history_exists());
    }
}
