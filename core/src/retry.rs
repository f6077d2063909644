use std::time::Duration;

/// 重试策略
///
/// `attempt` is zero-based: the delay before the second try is
/// `next_delay(0, ..)`. `None` means give up.
pub trait RetryStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn next_delay(&self, attempt: u32, error: &str) -> Option<Duration>;
    fn max_attempts(&self) -> u32;
    fn should_retry(&self, attempt: u32, error: &str) -> bool {
        attempt < self.max_attempts() && !self.is_fatal_error(error)
    }
    fn is_fatal_error(&self, _error: &str) -> bool {
        false
    }
}

/// Retry right away, up to `max_attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct ImmediateRetry {
    pub max_attempts: u32,
}

impl RetryStrategy for ImmediateRetry {
    fn name(&self) -> &str {
        "immediate"
    }

    fn next_delay(&self, attempt: u32, _error: &str) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(Duration::ZERO)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
