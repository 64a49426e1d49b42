use std::time::Duration;

/// Capped exponential backoff for reconnecting to the event feed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Retries allowed after consecutive failures before giving up.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Exponential multiplier per retry step.
    pub backoff_factor: f64,
    /// Upper bound for computed delays.
    pub max_backoff_ms: u64,
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl BackoffPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn exponential(max_retries: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let initial = if initial_backoff_ms == 0 {
            default_initial_backoff_ms()
        } else {
            initial_backoff_ms
        };
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_retries,
            initial_backoff_ms: initial,
            backoff_factor: factor,
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms.max(1);
        self
    }

    /// Whether retry number `attempt` (1-based) is still allowed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_retries
    }

    /// `min(initial * factor^(attempt-1), max)` for a 1-based `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_factor
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round();
        let cap = self.max_backoff_ms.max(1);
        let clamped = if base.is_finite() && base < cap as f64 {
            base as u64
        } else {
            cap
        };
        Duration::from_millis(clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::BackoffPolicy;

    #[test]
    fn none_policy_has_zero_retries() {
        let p = BackoffPolicy::none();
        assert_eq!(p.max_retries, 0);
        assert!(!p.can_retry(1));
    }

    #[test]
    fn feed_policy_doubles_then_caps() {
        let p = BackoffPolicy::exponential(5, 1_000, 2.0).with_max_backoff_ms(10_000);
        let delays: Vec<u128> = (1..=6).map(|a| p.delay_for_attempt(a).as_millis()).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
        assert!(p.can_retry(5));
        assert!(!p.can_retry(6));
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let p = BackoffPolicy::exponential(3, 100, 2.0).with_max_backoff_ms(250);
        assert_eq!(p.delay_for_attempt(10_000).as_millis(), 250);
    }
}
