//! Retry logic with exponential backoff for handling transient failures.
//!
//! Outbound calls to the payout provider are retried in-process a bounded
//! number of times before the failure is surfaced to the payout engine. The
//! delay doubles per attempt, is capped, is jittered, and yields to a
//! server-supplied `Retry-After` hint when one is present.
//!
//! # Example
//!
//! ```rust
//! use boxoffice_runtime::retry::{Attempt, RetryPolicy, retry_with_hint};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(1))
//!     .build();
//!
//! let result = retry_with_hint(&policy, |_attempt| async {
//!     Attempt::<u32, String>::Done(42)
//! })
//! .await?;
//! assert_eq!(result, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3 (the first call plus two retries)
/// - `initial_delay`: 500ms
/// - `max_delay`: 10 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: on
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of calls, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff and hints)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Un-jittered delay after failed attempt `attempt` (0-indexed).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_possible_wrap)]
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(64) as i32);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay to wait after failed attempt `attempt`.
    ///
    /// A server hint wins over the computed backoff but is still capped at
    /// `max_delay`; jitter only applies to the computed backoff.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }
        let base = self.base_delay(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            base.mul_f64(factor)
        } else {
            base
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the total number of calls (at least one call is always made).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Outcome of one call inside [`retry_with_hint`].
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Succeeded.
    Done(T),
    /// Failed transiently; try again, optionally not before `after`.
    Retry {
        /// The failure
        error: E,
        /// Server-supplied wait (e.g. `Retry-After`)
        after: Option<Duration>,
    },
    /// Failed terminally; do not try again.
    Fail(E),
}

/// Retry an async operation that classifies its own failures.
///
/// `operation` receives the 0-indexed attempt number. Retries stop at the
/// first [`Attempt::Done`] or [`Attempt::Fail`], or once
/// `policy.max_attempts` calls have been made, in which case the last
/// transient error is returned.
///
/// # Errors
///
/// Returns the terminal error, or the last transient error once attempts are
/// exhausted.
pub async fn retry_with_hint<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Attempt::Done(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Attempt::Fail(err) => {
                tracing::warn!(attempt, error = %err, "Error is not retryable, failing immediately");
                return Err(err);
            }
            Attempt::Retry { error, after } => {
                if attempt + 1 >= max_attempts {
                    tracing::error!(attempt, error = %error, "Operation failed after max attempts");
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt, after);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    hinted = after.is_some(),
                    error = %error,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(20))
            .build()
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .max_delay(Duration::from_secs(60))
            .build();
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1, None);
            assert!(delay >= Duration::from_millis(1000) && delay <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn test_hint_wins_but_is_capped() {
        let policy = fast_policy(3);
        assert_eq!(
            policy.delay_for_attempt(0, Some(Duration::from_millis(7))),
            Duration::from_millis(7)
        );
        assert_eq!(
            policy.delay_for_attempt(0, Some(Duration::from_secs(120))),
            Duration::from_millis(20)
        );
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_hint(&fast_policy(3), |attempt| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Attempt::Retry {
                        error: format!("attempt {attempt} failed"),
                        after: None,
                    }
                } else {
                    Attempt::Done(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = retry_with_hint(&fast_policy(2), |attempt| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::Retry {
                    error: format!("boom {attempt}"),
                    after: Some(Duration::from_millis(1)),
                }
            }
        })
        .await;

        assert_eq!(result, Err("boom 1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), &str> = retry_with_hint(&fast_policy(5), |_| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::Fail("bad request")
            }
        })
        .await;

        assert_eq!(result, Err("bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
