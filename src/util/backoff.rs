//! Exponential backoff with multiplicative jitter.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction applied as ±jitter, e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based) without jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before retry number `attempt` (0-based), jittered and capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return nominal;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        nominal.mul_f64(factor).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal(0), Duration::from_secs(1));
        assert_eq!(policy.nominal(1), Duration::from_secs(2));
        assert_eq!(policy.nominal(4), Duration::from_secs(16));
        assert_eq!(policy.nominal(5), Duration::from_secs(30));
        assert_eq!(policy.nominal(40), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = BackoffPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(3190), "{delay:?}");
            assert!(delay <= Duration::from_millis(4810), "{delay:?}");
        }
    }

    #[test]
    fn jittered_delay_never_exceeds_cap() {
        let policy = BackoffPolicy::default();
        for _ in 0..200 {
            assert!(policy.delay(10) <= policy.cap);
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }
}
