//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Delay to wait before attempt `attempt` (1-based).
///
/// The first attempt never waits. Attempt `k >= 2` waits
/// `min(initial × multiplier^(k-2), max)`, plus up to `jitter_ratio` of that.
pub fn calculate_backoff(
    attempt: u32,
    initial: Duration,
    multiplier: f64,
    max: Duration,
    jitter_ratio: f64,
) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
    let raw_ms = initial.as_millis() as f64 * multiplier.max(1.0).powi(exponent);
    let capped_ms = raw_ms.min(max.as_millis() as f64);

    let jitter_ms = if jitter_ratio > 0.0 && capped_ms >= 1.0 {
        rand::thread_rng().gen_range(0.0..=capped_ms * jitter_ratio.min(1.0))
    } else {
        0.0
    };

    Duration::from_millis((capped_ms + jitter_ms) as u64)
}
