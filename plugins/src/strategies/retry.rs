use labkeeper_core::api::{RetryConfig, RetryStrategy};
use std::time::Duration;

pub struct ExponentialBackoff {
    config: RetryConfig,
}

pub struct LinearRetry {
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl LinearRetry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn next_delay(&self, attempt: u32, _error: &str) -> Option<Duration> {
        if attempt >= self.config.max_attempts {
            return None;
        }
        let exp = 1u64 << attempt.min(30);
        let delay = self.config.base_delay_ms.saturating_mul(exp);
        let delay = delay.min(self.config.max_delay_ms);
        Some(Duration::from_millis(delay))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

impl RetryStrategy for LinearRetry {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, attempt: u32, _error: &str) -> Option<Duration> {
        if attempt >= self.config.max_attempts {
            return None;
        }
        let multiplier = attempt.saturating_add(1) as u64;
        let delay = self.config.base_delay_ms.saturating_mul(multiplier);
        let delay = delay.min(self.config.max_delay_ms);
        Some(Duration::from_millis(delay))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let cfg = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            max_attempts: 3,
            strategy: "exponential-backoff".to_string(),
        };
        let strategy = ExponentialBackoff::new(cfg);
        assert_eq!(strategy.next_delay(0, "err").unwrap().as_millis(), 100);
        assert_eq!(strategy.next_delay(1, "err").unwrap().as_millis(), 200);
        assert_eq!(strategy.next_delay(3, "err"), None);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let cfg = RetryConfig {
            base_delay_ms: 400,
            max_delay_ms: 1000,
            max_attempts: 10,
            strategy: "exponential-backoff".to_string(),
        };
        let strategy = ExponentialBackoff::new(cfg);
        assert_eq!(strategy.next_delay(5, "err").unwrap().as_millis(), 1000);
    }

    #[test]
    fn test_linear_backoff() {
        let cfg = RetryConfig {
            base_delay_ms: 50,
            max_delay_ms: 200,
            max_attempts: 4,
            strategy: "linear".to_string(),
        };
        let strategy = LinearRetry::new(cfg);
        assert_eq!(strategy.next_delay(0, "err").unwrap().as_millis(), 50);
        assert_eq!(strategy.next_delay(2, "err").unwrap().as_millis(), 150);
        assert!(!strategy.should_retry(4, "err"));
    }
}
