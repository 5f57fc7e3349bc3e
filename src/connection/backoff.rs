//! Reconnection Backoff
//!
//! `delay = min(base * factor ^ attempt, max)`

use std::time::Duration;

use super::config::ConnectionConfig;

/// Exponential backoff policy with a delay cap and an attempt limit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub grow_factor: f64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            base_delay_ms: config.reconnection_delay_ms,
            max_delay_ms: config.max_reconnection_delay_ms,
            grow_factor: config.reconnection_delay_grow_factor,
            max_attempts: config.reconnection_attempts,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.grow_factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Whether `attempts_so_far` retries have used up the budget
    pub fn is_exhausted(&self, attempts_so_far: u32) -> bool {
        attempts_so_far >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, factor: f64, max: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay_ms: base,
            max_delay_ms: max,
            grow_factor: factor,
            max_attempts: 10,
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = policy(1000, 2.0, 8000);
        let delays: Vec<u64> = (0..5)
            .map(|attempt| policy.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn test_default_config_policy() {
        let policy = ReconnectPolicy::from_config(&ConnectionConfig::default());
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
        assert_eq!(policy.delay_for(50), Duration::from_millis(30_000));
    }

    #[test]
    fn test_huge_attempt_saturates_at_max() {
        let policy = policy(1000, 10.0, 5000);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_exhaustion() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            ..policy(100, 2.0, 1000)
        };
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }
}
