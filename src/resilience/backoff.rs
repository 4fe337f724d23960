//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based):
/// `min(base * 2^(attempt-1), max)`.
///
/// With `jitter`, up to 10% is added and the result is re-capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    if !jitter {
        return Duration::from_millis(capped_delay);
    }

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis((capped_delay + jitter).min(max_ms))
}
