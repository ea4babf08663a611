// src/engine/retry.rs

//! Bounded retry with exponential backoff.
//!
//! Runs on the blocking worker pool, so plain `thread::sleep` between
//! attempts is fine. An operation distinguishes three outcomes per attempt:
//! done, retryable (with a reason), or a hard error that stops the loop
//! immediately.

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {reason}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub reason: String,
}

/// Per-attempt result of a retryable operation.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it reports [`Attempt::Done`], up to `max_attempts`
    /// times, sleeping between attempts with exponential backoff. A hard
    /// error from `op` is returned as-is; exhausting the attempts yields
    /// [`RetryExhausted`] carrying the last retry reason.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<Attempt<T>>) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay;
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            match op()? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(reason) => {
                    debug!(attempt, max_attempts, %reason, "attempt failed, will retry");
                    last_reason = reason;
                    if attempt < max_attempts {
                        std::thread::sleep(delay);
                        delay = Duration::from_secs_f64(
                            delay.as_secs_f64() * self.backoff_multiplier,
                        );
                    }
                }
            }
        }

        Err(RetryExhausted {
            attempts: max_attempts,
            reason: last_reason,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn policy(max_attempts: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn succeeds_without_retrying() {
        let mut calls = 0;
        let result = policy(3, 1).run(|| {
            calls += 1;
            Ok(Attempt::Done(42))
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result = policy(5, 1).run(|| {
            calls += 1;
            if calls < 3 {
                Ok(Attempt::Retry("busy".into()))
            } else {
                Ok(Attempt::Done(()))
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_exactly_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = policy(3, 1).run(|| {
            calls += 1;
            Ok(Attempt::Retry("still locked".into()))
        });
        assert_eq!(calls, 3);
        let err = result.unwrap_err();
        let exhausted = err.downcast_ref::<RetryExhausted>().unwrap();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.reason, "still locked");
    }

    #[test]
    fn hard_errors_stop_immediately() {
        let mut calls = 0;
        let result: Result<()> = policy(5, 1).run(|| {
            calls += 1;
            Err(anyhow::anyhow!("disk gone"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn backoff_delays_between_attempts() {
        let start = Instant::now();
        let _: Result<()> = policy(3, 20).run(|| Ok(Attempt::Retry("busy".into())));
        // Two sleeps: 20ms then 40ms.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
