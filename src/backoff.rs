// Exponential backoff applied after consecutive failed polling cycles.
// One failure counter drives both "portal returned no dates" cycles and transient network retries.

use std::time::Duration;

// Upper bound for any configured delay or computed sleep (one year)
pub const MAX_DELAY_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// `min(round(base * multiplier^failures), max)`, in seconds.
///
/// A non-finite intermediate (overflow) clamps to `max_delay`.
pub fn failure_backoff_delay(
    consecutive_failures: u32,
    base_delay: f64,
    multiplier: f64,
    max_delay: f64,
) -> f64 {
    let delay = base_delay * multiplier.powf(f64::from(consecutive_failures));

    if !delay.is_finite() {
        return max_delay;
    }

    delay.round().min(max_delay)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay_secs: f64,
    pub multiplier: f64,
    pub max_delay_secs: f64,
}

impl BackoffPolicy {
    pub fn delay_secs(&self, consecutive_failures: u32) -> f64 {
        failure_backoff_delay(
            consecutive_failures,
            self.base_delay_secs,
            self.multiplier,
            self.max_delay_secs,
        )
    }

    // never panics: the delay is clamped to MAX_DELAY_SECS before conversion
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let secs = self.delay_secs(consecutive_failures).clamp(0.0, MAX_DELAY_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(MAX_DELAY_SECS as u64))
    }
}
