// crates/az-scout-core/src/runtime/retry.rs
// ============================================================================
// Module: Retry Policy
// Description: Bounded exponential backoff with jitter for transient failures.
// Purpose: Share one retry discipline between token exchange and ARM probes.
// Dependencies: rand, tokio, tracing
// ============================================================================

//! ## Overview
//! A [`RetryPolicy`] bounds both the number of attempts and the total time
//! spent sleeping between them. Delays double from `initial_backoff`, are
//! capped at `max_backoff`, and gain 0-50% random jitter. [`with_retry`]
//! retries only errors the caller classifies as transient; every other error
//! is returned immediately. Cancelling the request ends a pending backoff and
//! returns the last transient error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Retry limits for one operation.
///
/// # Invariants
/// - `max_attempts` counts the first attempt; `1` disables retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for a single delay before jitter.
    pub max_backoff: Duration,
    /// Upper bound for the sum of all delays.
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            max_total_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            max_total_wait: Duration::ZERO,
        }
    }

    /// Returns the jittered delay after the zero-based `attempt` failed.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self.initial_backoff.saturating_mul(factor).min(self.max_backoff);
        let jitter_range = u64::try_from(capped.as_millis() / 2).unwrap_or(u64::MAX);
        if jitter_range == 0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_range);
        capped.saturating_add(Duration::from_millis(jitter))
    }

    /// Returns the delay to sleep before another attempt, or `None` when the
    /// attempt or wait budget is exhausted.
    ///
    /// `attempt` is zero-based; `waited` is the total already slept.
    #[must_use]
    pub fn next_delay(&self, attempt: u32, waited: Duration, proposed: Duration) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }
        let remaining = self.max_total_wait.checked_sub(waited)?;
        if proposed > remaining {
            return None;
        }
        Some(proposed)
    }
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Executes `operation`, retrying errors for which `is_transient` is true.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once the policy's budget is spent or `cancel` fires.
///
/// # Errors
///
/// Returns the operation's error as described above.
pub async fn with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    is_transient: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    let mut waited = Duration::ZERO;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_transient(&err) => {
                let Some(delay) = policy.next_delay(attempt, waited, policy.backoff(attempt))
                else {
                    tracing::debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "retry budget exhausted"
                    );
                    return Err(err);
                };
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient error, retrying after backoff"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::debug!(operation = operation_name, "retry abandoned on cancellation");
                        return Err(err);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                waited = waited.saturating_add(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test assertions use unwrap for clarity.")]

    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_total_wait: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_doubles_and_caps_with_bounded_jitter() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            max_total_wait: Duration::from_secs(60),
        };
        for (attempt, base) in [(0, 100u64), (1, 200), (2, 400), (3, 800), (4, 1_000), (9, 1_000)] {
            let delay = policy.backoff(attempt);
            assert!(delay >= Duration::from_millis(base), "attempt {attempt}");
            assert!(delay <= Duration::from_millis(base + base / 2), "attempt {attempt}");
        }
    }

    #[test]
    fn next_delay_respects_attempt_and_wait_budgets() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            max_total_wait: Duration::from_millis(25),
        };
        let step = Duration::from_millis(10);
        assert_eq!(policy.next_delay(0, Duration::ZERO, step), Some(step));
        assert_eq!(policy.next_delay(2, Duration::ZERO, step), None);
        assert_eq!(policy.next_delay(1, Duration::from_millis(20), step), None);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, String> =
            with_retry(&fast_policy(3), "test", &CancellationToken::new(), |_: &String| true, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("flaky".to_string()) } else { Ok(n) }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> =
            with_retry(&fast_policy(5), "test", &CancellationToken::new(), |err: &String| err == "flaky", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            })
            .await;
        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> =
            with_retry(&fast_policy(2), "test", &CancellationToken::new(), |_: &String| true, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("flaky".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_ends_backoff_with_last_error() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            max_total_wait: Duration::from_secs(300),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = tokio::time::timeout(
            Duration::from_secs(5),
            with_retry(&policy, "test", &cancel, |_: &String| true, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("flaky".to_string())
            }),
        )
        .await
        .unwrap();
        assert_eq!(result, Err("flaky".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
