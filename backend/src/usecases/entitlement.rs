use crates::domain::value_objects::enums::access_levels::AccessVerdict;

/// Read-only pages a user with an expired trial may still open.
pub const BASIC_ACCESS_PAGES: [&str; 3] = ["/dashboard", "/transactions", "/reports"];

#[derive(Debug, Clone, Copy, Default)]
pub struct EntitlementInput<'a> {
    pub is_admin: bool,
    pub trial_active: bool,
    pub has_paid_subscription: bool,
    pub trial_history_exists: bool,
    pub current_page: Option<&'a str>,
}

/// Hierarchical access resolver: admin > paid > active trial > basic > none.
///
/// Paid takes the access-level label even while a trial is simultaneously
/// active, and an active trial grants access regardless of the provider's
/// own subscribed flag (trial entitlement is authoritative over provider
/// sync state). Logging and telemetry live in the calling layer; this
/// function stays pure.
pub fn resolve_access(input: EntitlementInput<'_>) -> AccessVerdict {
    if input.is_admin {
        return AccessVerdict::Admin;
    }
    if input.has_paid_subscription {
        return AccessVerdict::Paid;
    }
    if input.trial_active {
        return AccessVerdict::Trial;
    }
    if input.trial_history_exists
        && input
            .current_page
            .is_some_and(|page| BASIC_ACCESS_PAGES.contains(&page))
    {
        return AccessVerdict::Basic;
    }
    AccessVerdict::None
}

pub fn effective_subscription(trial_active: bool, has_paid_subscription: bool) -> bool {
    has_paid_subscription || trial_active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_outranks_everything() {
        let verdict = resolve_access(EntitlementInput {
            is_admin: true,
            trial_active: true,
            has_paid_subscription: true,
            trial_history_exists: true,
            current_page: Some("/dashboard"),
        });
        assert_eq!(verdict, AccessVerdict::Admin);
        assert!(verdict.has_access());
    }

    #[test]
    fn paid_takes_the_label_even_while_a_trial_is_active() {
        let verdict = resolve_access(EntitlementInput {
            trial_active: true,
            has_paid_subscription: true,
            ..Default::default()
        });
        assert_eq!(verdict, AccessVerdict::Paid);
        assert_eq!(verdict.as_str(), "premium");
        assert!(effective_subscription(true, true));
    }

    #[test]
    fn active_trial_grants_access_without_payment() {
        let verdict = resolve_access(EntitlementInput {
            trial_active: true,
            ..Default::default()
        });
        assert_eq!(verdict, AccessVerdict::Trial);
        assert_eq!(verdict.as_str(), "trial");
        assert!(effective_subscription(true, false));
    }

    #[test]
    fn lapsed_trial_gets_basic_access_on_allowed_pages_only() {
        let on_dashboard = resolve_access(EntitlementInput {
            trial_history_exists: true,
            current_page: Some("/dashboard"),
            ..Default::default()
        });
        assert_eq!(on_dashboard, AccessVerdict::Basic);

        let on_settings = resolve_access(EntitlementInput {
            trial_history_exists: true,
            current_page: Some("/settings"),
            ..Default::default()
        });
        assert_eq!(on_settings, AccessVerdict::None);

        let no_page = resolve_access(EntitlementInput {
            trial_history_exists: true,
            ..Default::default()
        });
        assert_eq!(no_page, AccessVerdict::None);
    }

    #[test]
    fn no_history_no_payment_resolves_to_none() {
        let verdict = resolve_access(EntitlementInput::default());
        assert_eq!(verdict, AccessVerdict::None);
        assert!(!verdict.has_access());
        assert!(!effective_subscription(false, false));
    }
}
