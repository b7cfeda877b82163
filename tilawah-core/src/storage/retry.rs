use std::time::Duration;

use rand::Rng;

use crate::config::StorageRetrySection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// head, copy, delete, list
    Metadata,
    /// put, get
    Transfer,
}

/// Exponential backoff: the base delay doubles each attempt up to the cap, plus jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(config: &StorageRetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            jitter_ms: config.jitter_ms,
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ms: 0,
        }
    }

    /// Metadata calls get 3 attempts, transfers 5, both bounded by the configured maximum.
    pub fn attempts_for(&self, class: OperationClass) -> u32 {
        let wanted = match class {
            OperationClass::Metadata => 3,
            OperationClass::Transfer => 5,
        };
        wanted.min(self.max_attempts)
    }

    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let mut delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter_ms > 0 {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms));
        }
        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&StorageRetrySection::default())
    }
}
