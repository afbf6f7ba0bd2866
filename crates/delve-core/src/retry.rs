//! Backoff math shared by the provider retry wrapper and the graph committer.

use std::time::Duration;

/// Exponential backoff with symmetric jitter.
///
/// `min(max, base * 2^attempt)` varied by `±jitter_factor`, driven by
/// `random` in `[0.0, 1.0)`. Never below 100 ms unless the cap is lower.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn backoff_delay_with_random(
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter_factor: f64,
    random: f64,
) -> Duration {
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let capped = base_ms.saturating_mul(1u64 << attempt.min(31)).min(max_ms) as f64;

    let jitter_range = capped * jitter_factor.clamp(0.0, 1.0);
    let jitter = (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter_range;
    let floor = 100.0_f64.min(max_ms as f64);
    Duration::from_millis((capped + jitter).max(floor).round() as u64)
}

/// [`backoff_delay_with_random`] with a thread-local PRNG.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter_factor: f64) -> Duration {
    backoff_delay_with_random(attempt, base, max, jitter_factor, rand::random::<f64>())
}
