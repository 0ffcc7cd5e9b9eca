use chrono::{DateTime, Utc};
use serde::Serialize;

pub const PREMIUM_MONTHLY: &str = "premium_monthly";
pub const PREMIUM_ANNUAL: &str = "premium_annual";

/// Immutable recurring-billing plan definition. The catalog is static;
/// plans never change at runtime.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriptionPlan {
    pub id: &'static str,
    pub amount_minor: i64,
    pub currency: &'static str,
    pub frequency: u32,
    pub frequency_type: &'static str,
    pub trial_days: i64,
    pub features: &'static [&'static str],
}

impl SubscriptionPlan {
    pub fn billing_cycle_months(&self) -> u32 {
        match self.frequency_type {
            "years" => self.frequency * 12,
            _ => self.frequency,
        }
    }
}

static PLAN_CATALOG: [SubscriptionPlan; 2] = [
    SubscriptionPlan {
        id: PREMIUM_MONTHLY,
        amount_minor: 999,
        currency: "USD",
        frequency: 1,
        frequency_type: "months",
        trial_days: 14,
        features: &[
            "unlimited_transactions",
            "vehicle_tracking",
            "reports",
            "exports",
        ],
    },
    SubscriptionPlan {
        id: PREMIUM_ANNUAL,
        amount_minor: 9900,
        currency: "USD",
        frequency: 12,
        frequency_type: "months",
        trial_days: 14,
        features: &[
            "unlimited_transactions",
            "vehicle_tracking",
            "reports",
            "exports",
        ],
    },
];

pub fn plan_catalog() -> &'static [SubscriptionPlan] {
    &PLAN_CATALOG
}

/// Unknown ids return None; callers reject those with an invalid-plan error.
pub fn get_plan(plan_id: &str) -> Option<&'static SubscriptionPlan> {
    PLAN_CATALOG.iter().find(|plan| plan.id == plan_id)
}

/// Maps a charged amount back to its plan, for webhook payloads that carry
/// only the amount.
pub fn find_plan_by_amount(amount_minor: i64) -> Option<&'static SubscriptionPlan> {
    PLAN_CATALOG
        .iter()
        .find(|plan| plan.amount_minor == amount_minor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Proration {
    pub days_total: i64,
    pub days_used: i64,
    pub days_remaining: i64,
    pub refund_minor: i64,
    pub charge_minor: i64,
    /// Positive means the switch requires an immediate charge; negative
    /// means a refund is owed.
    pub net_minor: i64,
}

/// Day-granular proration for an immediate plan switch mid-cycle.
pub fn prorate(
    current_amount_minor: i64,
    new_amount_minor: i64,
    billing_start: DateTime<Utc>,
    billing_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Proration {
    let days_total = (billing_end - billing_start).num_days();
    if days_total <= 0 {
        return Proration {
            days_total: 0,
            days_used: 0,
            days_remaining: 0,
            refund_minor: 0,
            charge_minor: 0,
            net_minor: 0,
        };
    }

    let days_used = (now - billing_start).num_days();
    let days_remaining = (days_total - days_used).max(0);

    let refund_minor = current_amount_minor * days_remaining / days_total;
    let charge_minor = new_amount_minor * days_remaining / days_total;

    Proration {
        days_total,
        days_used,
        days_remaining,
        refund_minor,
        charge_minor,
        net_minor: charge_minor - refund_minor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unknown_plan_id_returns_none() {
        assert!(get_plan("gold_plated").is_none());
        assert!(get_plan(PREMIUM_MONTHLY).is_some());
    }

    #[test]
    fn upgrade_mid_cycle_charges_the_difference() {
        let start = Utc::now();
        let end = start + Duration::days(30);
        let now = start + Duration::days(10);

        let proration = prorate(999, 9900, start, end, now);

        assert_eq!(proration.days_total, 30);
        assert_eq!(proration.days_used, 10);
        assert_eq!(proration.days_remaining, 20);
        assert_eq!(proration.refund_minor, 999 * 20 / 30);
        assert_eq!(proration.charge_minor, 9900 * 20 / 30);
        assert!(proration.net_minor > 0);
    }

    #[test]
    fn downgrade_mid_cycle_nets_a_refund() {
        let start = Utc::now();
        let end = start + Duration::days(30);
        let now = start + Duration::days(10);

        let proration = prorate(9900, 999, start, end, now);

        assert!(proration.net_minor < 0);
        assert_eq!(proration.net_minor, proration.charge_minor - proration.refund_minor);
    }

    #[test]
    fn elapsed_cycle_prorates_to_zero() {
        let start = Utc::now();
        let end = start + Duration::days(30);
        let now = start + Duration::days(45);

        let proration = prorate(999, 9900, start, end, now);

        assert_eq!(proration.days_remaining, 0);
        assert_eq!(proration.net_minor, 0);
    }

    #[test]
    fn degenerate_period_prorates_to_zero() {
        let start = Utc::now();
        let proration = prorate(999, 9900, start, start, start);
        assert_eq!(proration.days_total, 0);
        assert_eq!(proration.net_minor, 0);
    }

    #[test]
    fn annual_plan_spans_twelve_months() {
        let plan = get_plan(PREMIUM_ANNUAL).unwrap();
        assert_eq!(plan.billing_cycle_months(), 12);
    }
}
