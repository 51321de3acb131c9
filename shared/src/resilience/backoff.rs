//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Calculates the delay before retry number `attempt` (1-based).
///
/// The delay is `base * 2^(attempt - 1)` capped at `max`, plus up to 10%
/// random jitter. Attempt 0 yields no delay.
#[must_use]
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    // Jitter is 0 to 10% of the capped delay.
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(2000);

    #[test]
    fn test_backoff_doubles() {
        let b1 = calculate_backoff(1, BASE, MAX);
        assert!(b1 >= Duration::from_millis(100) && b1 < Duration::from_millis(110));

        let b2 = calculate_backoff(2, BASE, MAX);
        assert!(b2 >= Duration::from_millis(200) && b2 < Duration::from_millis(220));

        let b3 = calculate_backoff(3, BASE, MAX);
        assert!(b3 >= Duration::from_millis(400) && b3 < Duration::from_millis(440));
    }

    #[test]
    fn test_backoff_capped() {
        let capped = calculate_backoff(10, BASE, Duration::from_millis(1000));
        assert!(capped >= Duration::from_millis(1000));
        assert!(capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_backoff_zero_attempt() {
        assert_eq!(calculate_backoff(0, BASE, MAX), Duration::ZERO);
    }

    #[test]
    fn test_backoff_huge_attempt_saturates() {
        let delay = calculate_backoff(200, Duration::from_secs(1), Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(30));
    }
}
