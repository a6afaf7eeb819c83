//! Pool tuning knobs (C5).

use crate::error::{DeepgramPoolError, Result};
use std::time::Duration;

/// Validated pool configuration.
///
/// `initial_size` and `max_size` are cross-validated on every setter: the
/// relation `initial_size <= max_size` must hold after each call.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    initial_size: usize,
    max_size: usize,
    keep_alive_interval: Duration,
    connection_timeout: Duration,
    acquire_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 5,
            max_size: 10,
            keep_alive_interval: Duration::from_millis(30_000),
            connection_timeout: Duration::from_millis(3_600_000),
            acquire_timeout: Duration::from_millis(5_000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1_000),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn with_initial_size(mut self, initial_size: usize) -> Result<Self> {
        if initial_size > self.max_size {
            return Err(DeepgramPoolError::InvalidArgument(format!(
                "initial_size ({initial_size}) must be <= max_size ({})",
                self.max_size
            )));
        }
        self.initial_size = initial_size;
        Ok(self)
    }

    pub fn with_max_size(mut self, max_size: usize) -> Result<Self> {
        if max_size < self.initial_size {
            return Err(DeepgramPoolError::InvalidArgument(format!(
                "max_size ({max_size}) must be >= initial_size ({})",
                self.initial_size
            )));
        }
        self.max_size = max_size;
        Ok(self)
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.initial_size(), 5);
        assert_eq!(cfg.max_size(), 10);
        assert_eq!(cfg.keep_alive_interval(), Duration::from_millis(30_000));
        assert_eq!(cfg.connection_timeout(), Duration::from_millis(3_600_000));
        assert_eq!(cfg.acquire_timeout(), Duration::from_millis(5_000));
        assert_eq!(cfg.max_retries(), 3);
        assert_eq!(cfg.retry_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn rejects_initial_size_above_max() {
        let cfg = PoolConfig::default();
        assert!(cfg.with_initial_size(99).is_err());
    }

    #[test]
    fn rejects_max_size_below_initial() {
        let cfg = PoolConfig::default();
        assert!(cfg.with_max_size(1).is_err());
    }

    #[test]
    fn allows_raising_max_then_initial() {
        let cfg = PoolConfig::default()
            .with_max_size(20)
            .unwrap()
            .with_initial_size(15)
            .unwrap();
        assert_eq!(cfg.initial_size(), 15);
        assert_eq!(cfg.max_size(), 20);
    }
}
