//! Reconnection backoff schedule.

use std::time::Duration;

/// Attempts per address before the registry gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Hard ceiling on any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(60_000);

/// Delay before reconnection attempt number `attempts + 1`.
///
/// Base is `1000ms * 2^attempts`. Busy servers get an extra multiplier of
/// `min(3 * attempts, 10)`, which is zero on the first attempt, so an initial
/// busy error retries immediately and later ones spread out fast.
pub fn backoff_delay(attempts: u32, server_busy: bool) -> Duration {
    let base = 1000u64.saturating_mul(1u64 << attempts.min(16));
    let multiplier = if server_busy {
        (3 * attempts as u64).min(10)
    } else {
        1
    };
    let millis = base.saturating_mul(multiplier).min(MAX_BACKOFF.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_errors_double() {
        assert_eq!(backoff_delay(0, false), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, false), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, false), Duration::from_millis(4000));
        assert_eq!(backoff_delay(3, false), Duration::from_millis(8000));
    }

    #[test]
    fn busy_at_two_attempts_is_24s() {
        // 1000 * 2^2 * min(3*2, 10) = 24_000ms.
        assert_eq!(backoff_delay(2, true), Duration::from_millis(24_000));
    }

    #[test]
    fn busy_first_attempt_retries_immediately() {
        assert_eq!(backoff_delay(0, true), Duration::ZERO);
    }

    #[test]
    fn capped_at_sixty_seconds() {
        assert_eq!(backoff_delay(4, true), MAX_BACKOFF);
        assert_eq!(backoff_delay(10, false), MAX_BACKOFF);
        assert_eq!(backoff_delay(u32::MAX, true), MAX_BACKOFF);
    }

    proptest! {
        #[test]
        fn never_exceeds_cap(attempts in 0u32..1000, busy: bool) {
            prop_assert!(backoff_delay(attempts, busy) <= MAX_BACKOFF);
        }

        #[test]
        fn non_decreasing_in_attempts(attempts in 0u32..64, busy: bool) {
            prop_assert!(backoff_delay(attempts, busy) <= backoff_delay(attempts + 1, busy));
        }
    }
}
