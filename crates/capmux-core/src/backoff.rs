//! Retry decisions and backoff delays
//!
//! Every retry path in the lifecycle manager goes through these helpers so
//! the policy lives in one place.

use rand::Rng;
use std::time::Duration;

use crate::domain::RetryPolicy;
use crate::error::ConnectionError;

/// Default jitter as a fraction of the capped delay
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Whether a failed connection should be retried at all
pub fn should_attempt_recovery(error: &ConnectionError) -> bool {
    error.is_recoverable()
}

/// Deterministic part of the delay: `min(base * multiplier^attempt, max)`
pub fn backoff_ceiling(attempt: u32, base: Duration, max: Duration, multiplier: f64) -> Duration {
    let factor = multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
    let millis = base.as_millis() as f64 * factor;
    if !millis.is_finite() || millis >= max.as_millis() as f64 {
        max
    } else {
        Duration::from_millis(millis as u64)
    }
}

/// Delay before retry number `attempt` (zero-based), with default jitter
pub fn calculate_retry_delay(
    attempt: u32,
    base: Duration,
    max: Duration,
    multiplier: f64,
) -> Duration {
    calculate_retry_delay_with_jitter(attempt, base, max, multiplier, DEFAULT_JITTER_RATIO)
}

/// Delay with a custom jitter ratio; the result lies in
/// `[ceiling, ceiling * (1 + jitter_ratio)]`
pub fn calculate_retry_delay_with_jitter(
    attempt: u32,
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter_ratio: f64,
) -> Duration {
    let ceiling = backoff_ceiling(attempt, base, max, multiplier);
    let ratio = jitter_ratio.clamp(0.0, 1.0);
    if ratio == 0.0 || ceiling.is_zero() {
        return ceiling;
    }
    let jitter = ceiling.mul_f64(rand::thread_rng().gen_range(0.0..=ratio));
    ceiling + jitter
}

impl RetryPolicy {
    /// Delay before retry number `attempt` under this policy
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        calculate_retry_delay_with_jitter(
            attempt,
            self.base_delay(),
            self.max_delay(),
            self.multiplier,
            self.jitter,
        )
    }
}
