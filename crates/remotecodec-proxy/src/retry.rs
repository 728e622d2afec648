//! Connection retry policy.

use std::time::Duration;

use remotecodec_core::ConnectionConfig;

/// How the supervisor paces connection attempts.
///
/// Each attempt may take at most `poll_interval`. After a failed attempt the
/// next one starts `delay_for_attempt` after the failed one started, so with
/// the default multiplier of 1.0 the host is polled once per interval.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub poll_interval: Duration,
    /// Upper bound on the delay between attempt starts.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum number of attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_delay: config.max_delay(),
            multiplier: config.backoff_multiplier,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay between the start of failed attempt `attempt` (0-indexed) and the next one.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.poll_interval.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt should be made after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_polls_every_second_forever() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(50), Duration::from_secs(1));
        assert!(policy.should_retry(u32::MAX - 1));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            poll_interval: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1_000), Duration::from_millis(500));
    }

    #[test]
    fn retry_with_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn built_from_config() {
        let config = ConnectionConfig {
            poll_interval_ms: 250,
            max_attempts: Some(4),
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, Some(4));
    }
}
