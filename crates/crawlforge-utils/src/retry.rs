//! Exponential backoff retry, the same shape as the teacher's
//! `riptide-fetch::fetch::RetryConfig`: a bounded attempt count, a
//! multiplicative delay schedule, and optional jitter to avoid thundering
//! herds across workers retrying at the same moment.

use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl BackoffConfig {
    /// §4.1's Store retry policy: 3 attempts, 250ms × 2^n.
    pub fn store_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let mut delay = Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()));
        if self.jitter {
            let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.3);
            delay += Duration::from_secs_f64(delay.as_secs_f64() * jitter_frac);
        }
        delay
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::store_default()
    }
}

/// Run `op` up to `config.max_attempts` times, sleeping between attempts
/// per the configured backoff. Returns the last error if every attempt
/// fails. `should_retry` lets the caller classify which errors are worth
/// retrying (e.g. only `StoreError::Transient`, never `Permanent`).
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &BackoffConfig,
    mut should_retry: impl FnMut(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                let exhausted = attempt >= config.max_attempts;
                if exhausted || !should_retry(&e) {
                    warn!(attempt, "retry exhausted or non-retryable: {}", e);
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt - 1);
                debug!(attempt, ?delay, "retrying after error: {}", e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let result: Result<u32, &str> = retry_with_backoff(
            &config,
            |_| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig::store_default();
        let result: Result<u32, &str> = retry_with_backoff(
            &config,
            |_| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let result: Result<u32, &str> = retry_with_backoff(
            &config,
            |_| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always fails") }
            },
        )
        .await;
        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
