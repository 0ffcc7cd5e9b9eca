use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;

/// How often the background sweep purges expired entries.
pub const PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10 * 60);

pub fn subscription_key(user_id: Uuid) -> String {
    format!("subscription:{}", user_id)
}

pub fn payment_key(user_id: Uuid) -> String {
    format!("payment:{}", user_id)
}

pub fn preapproval_key(user_id: Uuid) -> String {
    format!("preapproval:{}", user_id)
}

struct CacheEntry {
    data: Value,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    // An entry is expired strictly after its TTL elapses; at exactly `ttl` it
    // is still served.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.ttl
    }
}

/// Process-local TTL cache shielding provider/subscriber reads. Not shared
/// across instances; a restart clears all state.
pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn set(&self, key: &str, data: Value, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                created_at: self.clock.now(),
                ttl,
            },
        );
    }

    /// Expired entries are treated as misses and removed lazily.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.data.clone()),
            None => None,
        }
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.remove(key).is_some() {
            debug!(key, "cache: entry invalidated");
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

pub async fn run_purge_loop(cache: Arc<TtlCache>, interval: std::time::Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let purged = cache.purge_expired();
        if purged > 0 {
            debug!(purged, "cache: purged expired entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use serde_json::json;

    fn cache_at(start: DateTime<Utc>) -> (TtlCache, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(start));
        let handle = Arc::clone(&now);
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(move || *handle.lock().unwrap());
        (TtlCache::new(Arc::new(clock)), now)
    }

    #[test]
    fn returns_value_before_ttl_elapses() {
        let start = Utc::now();
        let (cache, now) = cache_at(start);

        cache.set("subscription:u1", json!({"subscribed": true}), Duration::seconds(60));

        *now.lock().unwrap() = start + Duration::seconds(60);
        assert_eq!(
            cache.get("subscription:u1"),
            Some(json!({"subscribed": true}))
        );
    }

    #[test]
    fn misses_strictly_after_ttl() {
        let start = Utc::now();
        let (cache, now) = cache_at(start);

        cache.set("subscription:u1", json!(1), Duration::seconds(60));

        *now.lock().unwrap() = start + Duration::seconds(61);
        assert_eq!(cache.get("subscription:u1"), None);
        // Lazy eviction removed the entry, so an earlier clock cannot revive it.
        *now.lock().unwrap() = start;
        assert_eq!(cache.get("subscription:u1"), None);
    }

    #[test]
    fn invalidate_removes_entry() {
        let (cache, _now) = cache_at(Utc::now());

        cache.set("payment:u1", json!("snapshot"), Duration::seconds(60));
        cache.invalidate("payment:u1");

        assert_eq!(cache.get("payment:u1"), None);
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let start = Utc::now();
        let (cache, now) = cache_at(start);

        cache.set("a", json!(1), Duration::seconds(30));
        cache.set("b", json!(2), Duration::seconds(120));

        *now.lock().unwrap() = start + Duration::seconds(31);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }
}
