use std::time::Duration;

use wagate_config::ReconnectConfig;

/// Backoff between reconnect attempts after a close or a failed open.
///
/// Attempts are counted from 1 and reset once a session reaches Active.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Retry right away, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before the given attempt, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        if self.initial_delay.is_zero() {
            return Some(Duration::ZERO);
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    #[test]
    fn grows_then_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(p.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(p.delay_for(4), Some(Duration::from_millis(800)));
        assert_eq!(p.delay_for(5), Some(Duration::from_secs(1)));
        assert_eq!(p.delay_for(u32::MAX), Some(Duration::from_secs(1)));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let p = policy().with_max_attempts(2);
        assert!(p.delay_for(2).is_some());
        assert_eq!(p.delay_for(3), None);
    }

    #[test]
    fn immediate_never_waits() {
        let p = ReconnectPolicy::immediate();
        assert_eq!(p.delay_for(1), Some(Duration::ZERO));
        assert_eq!(p.delay_for(10_000), Some(Duration::ZERO));
    }

    #[test]
    fn defaults_follow_config() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert_eq!(p.max_attempts, None);
    }
}
