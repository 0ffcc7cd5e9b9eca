use std::fmt::Display;

/// Resolved entitlement tier. `Paid` is surfaced to clients as "premium";
/// `Basic` is the read-only, page-restricted tier for lapsed trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessVerdict {
    Admin,
    Paid,
    Trial,
    Basic,
    None,
}

impl AccessVerdict {
    pub fn has_access(&self) -> bool {
        !matches!(self, AccessVerdict::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessVerdict::Admin => "admin",
            AccessVerdict::Paid => "premium",
            AccessVerdict::Trial => "trial",
            AccessVerdict::Basic => "basic",
            AccessVerdict::None => "none",
        }
    }
}

impl Display for AccessVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
