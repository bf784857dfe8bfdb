//! Bounded retries with backoff for fallible async calls.
//!
//! The policy is transport-agnostic: the caller supplies the predicate that
//! tells a transient failure (worth another attempt) from a permanent one
//! (reported immediately, without consuming the retry budget).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Longest pause a linear schedule may reach.
const LINEAR_CAP: Duration = Duration::from_secs(60);

/// Pause schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same pause after every failure.
    Constant(Duration),
    /// `failed_attempt * step`, never longer than `cap`.
    Linear { step: Duration, cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one; zero behaves like one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Three attempts, pausing 1s then 2s.
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Constant(Duration::ZERO),
        }
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear {
                step,
                cap: LINEAR_CAP.max(step),
            },
        }
    }

    pub fn constant(max_attempts: u32, pause: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Constant(pause),
        }
    }

    /// Pause after the `failed_attempt`-th failure (1-indexed).
    pub fn pause_after(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            _ if failed_attempt == 0 => Duration::ZERO,
            Backoff::Constant(pause) => pause,
            Backoff::Linear { step, cap } => step.saturating_mul(failed_attempt).min(cap),
        }
    }

    /// Whether another attempt is allowed once `attempts_made` have failed.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_transient: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !is_transient(&error) => {
                    return Err(RetryError::Permanent {
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(error) if !self.allows_another(attempt) => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(error) => {
                    let delay = self.pause_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Final failure of a retried operation, carrying the last underlying cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Not retried: the caller classified the failure as permanent.
    Permanent { attempts: u32, last: E },
    /// Every allowed attempt failed transiently.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Permanent { last, .. } | RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent { last, .. } | RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Permanent { last, .. } => write!(f, "permanent failure: {last}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "failed after {attempts} attempt(s): {last}")
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.last_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Fail {
        Flaky,
        Broken,
    }

    impl fmt::Display for Fail {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn transient(e: &Fail) -> bool {
        *e == Fail::Flaky
    }

    #[test]
    fn default_policy_pauses_one_then_two_seconds() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.pause_after(1), Duration::from_secs(1));
        assert_eq!(p.pause_after(2), Duration::from_secs(2));
    }

    #[test]
    fn constant_pause_ignores_attempt_number() {
        let p = RetryPolicy::constant(4, Duration::from_millis(250));
        assert_eq!(p.pause_after(1), p.pause_after(3));
        assert_eq!(p.pause_after(0), Duration::ZERO);
    }

    #[test]
    fn attempt_budget_includes_first_call() {
        let p = RetryPolicy::linear(3, Duration::from_millis(1));
        assert!(p.allows_another(2));
        assert!(!p.allows_another(3));
        assert!(!RetryPolicy::no_retry().allows_another(1));
        assert!(RetryPolicy::linear(0, Duration::ZERO).allows_another(0));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_linear_backoff() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let out = RetryPolicy::default()
            .run(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(Fail::Flaky) } else { Ok(n) }
                },
                transient,
            )
            .await;

        assert_eq!(out, Ok(3));
        // 1s after the first failure, 2s after the second.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(3000), "waited {waited:?}");
        assert!(waited < Duration::from_millis(3100), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_error_carries_last_cause() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Fail::Flaky)
                },
                transient,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.last_error(), &Fail::Flaky);
        assert_eq!(err.to_string(), "failed after 3 attempt(s): Flaky");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let err = RetryPolicy::default()
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Fail::Broken)
                },
                transient,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err, RetryError::Permanent { attempts: 1, last: Fail::Broken });
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Linear pauses never shrink between attempts and stay under the cap.
            #[test]
            fn linear_pause_grows_until_capped(
                step_ms in 1u64..5_000,
                cap_ms in 1u64..60_000,
                attempt in 1u32..50,
            ) {
                let p = RetryPolicy {
                    max_attempts: 50,
                    backoff: Backoff::Linear {
                        step: Duration::from_millis(step_ms),
                        cap: Duration::from_millis(cap_ms),
                    },
                };
                prop_assert!(p.pause_after(attempt) <= p.pause_after(attempt + 1));
                prop_assert!(p.pause_after(attempt) <= Duration::from_millis(cap_ms));
            }
        }
    }
}
