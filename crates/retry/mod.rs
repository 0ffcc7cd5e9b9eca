use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use rand::Rng;
use tracing::warn;

/// Sleep abstraction so backoff timing is testable without real waits.
#[async_trait]
#[automock]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exp_base: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
            exp_base: 2,
        }
    }
}

/// Wraps outbound calls with exponential backoff and jitter. The caller
/// decides which errors are worth retrying via `call_classified`.
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.call_classified(op, |_| true).await
    }

    /// Retries only while `is_retryable` holds; everything else fails fast.
    /// After the last failed attempt the final error is returned as-is.
    pub async fn call_classified<T, E, F, Fut, C>(&self, mut op: F, is_retryable: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.policy.max_retries && is_retryable(&err) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retry: call failed, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // min(base * exp_base^attempt, max_delay) + uniform jitter of 0..10%.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.policy.exp_base.saturating_pow(attempt);
        let backoff = self
            .policy
            .base_delay
            .saturating_mul(factor)
            .min(self.policy.max_delay);

        let jitter_cap = backoff.as_millis() as u64 / 10;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };

        backoff + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn recording_sleeper() -> (Arc<MockSleeper>, Arc<Mutex<Vec<Duration>>>) {
        let slept = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::clone(&slept);
        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().returning(move |duration| {
            handle.lock().unwrap().push(duration);
            Box::pin(async {})
        });
        (Arc::new(sleeper), slept)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_with_one_delay_per_failure() {
        let (sleeper, slept) = recording_sleeper();
        let executor = RetryExecutor::new(RetryPolicy::default(), sleeper);
        let attempts = AtomicU32::new(0);

        let result: Result<u32, String> = executor
            .call(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(slept.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rethrows_last_error_after_exhausting_retries() {
        let (sleeper, slept) = recording_sleeper();
        let executor = RetryExecutor::new(RetryPolicy::default(), sleeper);
        let attempts = AtomicU32::new(0);

        let result: Result<u32, String> = executor
            .call(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {}", n)) }
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        // max_retries = 3 means one initial attempt plus three retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(slept.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let (sleeper, slept) = recording_sleeper();
        let executor = RetryExecutor::new(RetryPolicy::default(), sleeper);
        let attempts = AtomicU32::new(0);

        let result: Result<u32, String> = executor
            .call_classified(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal".to_string()) }
                },
                |err| err != "fatal",
            )
            .await;

        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backoff_grows_exponentially_and_caps_at_max_delay() {
        let (sleeper, slept) = recording_sleeper();
        let executor = RetryExecutor::new(
            RetryPolicy {
                max_retries: 4,
                ..RetryPolicy::default()
            },
            sleeper,
        );

        let result: Result<(), String> = executor
            .call(|| async { Err("always".to_string()) })
            .await;
        assert!(result.is_err());

        let slept = slept.lock().unwrap();
        let bounds = [(1000, 1100), (2000, 2200), (4000, 4400), (8000, 8800)];
        for (delay, (lo, hi)) in slept.iter().zip(bounds) {
            let ms = delay.as_millis() as u64;
            assert!(ms >= lo && ms <= hi, "delay {}ms outside [{}, {}]", ms, lo, hi);
        }
    }
}
