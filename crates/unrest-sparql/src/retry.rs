//! Per-attempt timeout plus fixed-schedule backoff with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::UpstreamError;

/// Retry configuration.
///
/// The attempt budget is `backoff.len() + 1`: one initial attempt plus one
/// retry per scheduled delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delays before the 2nd, 3rd, ... attempt.
    pub backoff: Vec<Duration>,
    /// Relative jitter applied to each delay, e.g. `0.2` for ±20%.
    pub jitter: f64,
    /// Hard limit for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::from_millis(500),
                Duration::from_millis(1500),
                Duration::from_millis(3500),
            ],
            jitter: 0.2,
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }

    /// Delay to wait after failed attempt number `retry` (zero-based),
    /// jittered uniformly within ±`jitter`.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let Some(base) = self.backoff.get(retry) else {
            return Duration::ZERO;
        };
        let jitter = self.jitter.clamp(0.0, 0.99);
        if jitter == 0.0 {
            return *base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor)
    }
}

/// Runs `op` until it succeeds, fails terminally, or the attempt budget is
/// spent. Each attempt is dropped (and so cancelled) once it exceeds
/// `attempt_timeout`; that counts as a retryable failure.
///
/// On exhaustion the last error is returned.
pub async fn run_with_retries<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(policy.attempt_timeout)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "upstream call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                warn!(attempt, error = %err, "upstream call failed, not retrying");
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(attempt, max_attempts, error = %err, "upstream retries exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "upstream call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_secs(5),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn delays_stay_within_jitter_bounds() {
        let policy = policy();
        for _ in 0..200 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(1200), "{d:?}");
            assert!(d <= Duration::from_millis(1800), "{d:?}");
        }
        assert_eq!(policy.delay_for(7), Duration::ZERO);
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..policy()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success_waits_two_delays() {
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let result = run_with_retries(&policy(), || {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(UpstreamError::RateLimited),
                    1 => Err(UpstreamError::Status(503)),
                    _ => Ok("rows"),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "rows");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // 500ms + 1500ms, each ±20%
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1600), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2400), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_stops_after_budget() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = run_with_retries(&policy(), || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError::Status(500 + n as u16))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // The last error is surfaced, not the first.
        assert!(matches!(result, Err(UpstreamError::Status(503))));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = run_with_retries(&policy(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError::Malformed("missing results".into()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(UpstreamError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(100),
            ..policy()
        };

        let result = run_with_retries(&policy, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_timing_out_surfaces_timeout() {
        let policy = RetryPolicy {
            backoff: vec![Duration::from_millis(10)],
            jitter: 0.0,
            attempt_timeout: Duration::from_millis(50),
        };

        let result: Result<(), _> = run_with_retries(&policy, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(UpstreamError::Timeout(d)) if d == Duration::from_millis(50)));
    }
}
