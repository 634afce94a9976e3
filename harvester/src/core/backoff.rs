//! Exponential backoff schedule for agent retries.

use std::time::Duration;

/// Delay to sleep before `attempt` (1-indexed).
///
/// Attempt 1 runs immediately. Attempt `n >= 2` waits
/// `min(initial * 2^(n-2), max)`; arithmetic saturates instead of overflowing.
pub fn delay_before_attempt(attempt: u32, initial: Duration, max: Duration) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let exponent = attempt - 2;
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    initial.saturating_mul(factor).min(max)
}

/// Total sleep accumulated when every one of `max_attempts` attempts fails.
pub fn worst_case_sleep(max_attempts: u32, initial: Duration, max: Duration) -> Duration {
    (1..=max_attempts)
        .map(|attempt| delay_before_attempt(attempt, initial, max))
        .fold(Duration::ZERO, Duration::saturating_add)
}
