//! Bounded exponential backoff for relay reconnects

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure. Each further failure doubles it.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `failures` failed ones
    pub fn allows_another(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Delay to wait after the `failures`-th failure (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(800));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1600));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    #[test]
    fn test_large_attempts_saturate() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_after(64) >= policy.delay_after(31));
    }
}
