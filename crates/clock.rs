use chrono::{DateTime, Utc};
use mockall::automock;

/// Time source for everything that makes expiry or scheduling decisions.
/// Injected so cache TTLs, webhook freshness and dunning schedules are
/// deterministic under test.
#[automock]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
