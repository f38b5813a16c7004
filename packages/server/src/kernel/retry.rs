//! Generic retry policy with exponential backoff.
//!
//! The policy knows nothing about the operation it retries: callers pass the
//! operation and a predicate deciding which errors are worth another attempt.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    /// Wait `initial_delay` before the first attempt as well
    pub delay_first: bool,
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Non-retryable error; returned on first sight
    Permanent(E),
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl RetryPolicy {
    /// Attempt immediately, then back off `initial`, `initial * factor`, ...
    pub fn immediate(attempts: u32, initial_delay: Duration, factor: u32) -> Self {
        Self {
            attempts,
            initial_delay,
            factor,
            delay_first: false,
        }
    }

    /// Like `immediate`, but the first attempt also waits `initial`
    pub fn deferred(attempts: u32, initial_delay: Duration, factor: u32) -> Self {
        Self {
            attempts,
            initial_delay,
            factor,
            delay_first: true,
        }
    }

    /// Delay to wait before the given (0-based) attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let step = match (attempt, self.delay_first) {
            (0, false) => return Duration::ZERO,
            (n, true) => n,
            (n, false) => n - 1,
        };
        self.initial_delay
            .saturating_mul(self.factor.max(1).saturating_pow(step))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(RetryError::Permanent(e)),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(RetryError::Exhausted { attempts, last: e });
                    }
                    debug!(attempt, attempts, "Retryable failure, backing off");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_immediate_schedule() {
        let policy = RetryPolicy::immediate(4, Duration::from_secs(1), 2);
        let delays: Vec<_> = (0..4).map(|n| policy.delay_before(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_deferred_schedule() {
        let policy = RetryPolicy::deferred(3, Duration::from_secs(60), 2);
        let delays: Vec<_> = (0..3).map(|n| policy.delay_before(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(240)
            ]
        );
    }

    #[tokio::test]
    async fn test_succeeds_after_retryable_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(4, Duration::from_millis(1), 2);

        let result: Result<u32, RetryError<&str>> = policy
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err("busy")
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |e| *e == "busy",
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(4, Duration::from_millis(1), 2);

        let result: Result<(), RetryError<&str>> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("denied") }
                },
                |e| *e == "busy",
            )
            .await;

        assert!(matches!(result, Err(RetryError::Permanent("denied"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3, Duration::from_millis(1), 2);

        let result: Result<(), RetryError<&str>> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("busy") }
                },
                |_| true,
            )
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "busy");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
