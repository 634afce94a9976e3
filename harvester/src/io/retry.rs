//! Bounded retry with exponential backoff around a fallible attempt.

use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::core::backoff::delay_before_attempt;
use crate::io::config::RetryConfig;

/// Retry limits for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Handed to every attempt; the attempt is responsible for enforcing it.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: cfg.initial_delay(),
            max_delay: cfg.max_delay(),
            attempt_timeout: cfg.attempt_timeout(),
        }
    }
}

/// Context passed to each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-indexed.
    pub number: u32,
    pub timeout: Duration,
}

/// Source of blocking sleeps, swappable in tests.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// What `run_with_retry` observed.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// First success, or the last failure once attempts are exhausted.
    pub result: Result<T>,
    /// Attempts actually made.
    pub attempts: u32,
    /// Total backoff slept between attempts.
    pub slept: Duration,
}

/// Run `invoke` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// Attempt 1 runs immediately; each later attempt first sleeps the backoff
/// delay for its number. Every failure kind counts the same.
pub fn run_with_retry<T, S, F>(policy: &RetryPolicy, sleeper: &mut S, mut invoke: F) -> RetryOutcome<T>
where
    S: Sleeper + ?Sized,
    F: FnMut(Attempt) -> Result<T>,
{
    let mut slept = Duration::ZERO;
    let mut last_error = None;

    for number in 1..=policy.max_attempts {
        let delay = delay_before_attempt(number, policy.initial_delay, policy.max_delay);
        if !delay.is_zero() {
            info!(attempt = number, delay_secs = delay.as_secs_f64(), "backing off before retry");
            sleeper.sleep(delay);
            slept += delay;
        }

        match invoke(Attempt {
            number,
            timeout: policy.attempt_timeout,
        }) {
            Ok(value) => {
                info!(attempt = number, "attempt succeeded");
                return RetryOutcome {
                    result: Ok(value),
                    attempts: number,
                    slept,
                };
            }
            Err(err) => {
                warn!(attempt = number, max_attempts = policy.max_attempts, err = %format!("{err:#}"), "attempt failed");
                last_error = Some(err);
            }
        }
    }

    RetryOutcome {
        result: Err(last_error.unwrap_or_else(|| anyhow!("no attempts were allowed"))),
        attempts: policy.max_attempts,
        slept,
    }
}
