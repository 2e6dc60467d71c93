use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for lock acquisition retries.
///
/// The delay before attempt `n` (zero-based) is drawn uniformly from
/// `[base_delay, min(max_delay, base_delay * 2^n)]`. Jitter keeps a herd of
/// contenders from re-colliding on the same schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total acquisition attempts before giving up.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Jittered delay to sleep after failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let ceiling = exp.clamp(self.base_delay, self.max_delay);
        if ceiling <= self.base_delay {
            return self.base_delay;
        }
        rand::thread_rng().gen_range(self.base_delay..=ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }

    #[test]
    fn delays_stay_within_the_configured_band() {
        let p = policy();
        for attempt in 0..32 {
            for _ in 0..100 {
                let d = p.delay(attempt);
                assert!(d >= p.base_delay, "attempt {attempt}: {d:?} below floor");
                assert!(d <= p.max_delay, "attempt {attempt}: {d:?} above ceiling");
            }
        }
    }

    #[test]
    fn early_attempts_are_bounded_by_the_exponential_curve() {
        let p = policy();
        for _ in 0..100 {
            // attempt 1: ceiling is base * 2 = 40ms
            assert!(p.delay(1) <= Duration::from_millis(40));
        }
    }

    #[test]
    fn degenerate_band_collapses_to_the_base_delay() {
        let p = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        };
        assert_eq!(p.delay(3), Duration::from_millis(10));
    }
}
