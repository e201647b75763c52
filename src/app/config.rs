//! Application configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_QUEUE_LIMIT, DEFAULT_QUEUE_TIMEOUT_MS, DEFAULT_TIMEOUT_SECS};
use crate::error::{Result, TriesteError};

/// Configuration of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// How long the threads may take to initialize, counted from app creation
    pub timeout_secs: u64,
    /// Default high-water mark of the reader queues
    pub queue_limit: usize,
    /// Bound of a single blocking queue read or write
    pub queue_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            queue_timeout_ms: DEFAULT_QUEUE_TIMEOUT_MS,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initialization timeout
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the reader queue high-water mark
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit;
        self
    }

    /// Set the bound of blocking queue operations
    pub fn with_queue_timeout_ms(mut self, ms: u64) -> Self {
        self.queue_timeout_ms = ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Check the configuration for values that can not work
    pub fn validate(&self) -> Result<()> {
        if self.queue_limit == 0 {
            return Err(TriesteError::invalid_parameter(
                "queue_limit",
                "must be greater than 0",
            ));
        }
        if self.queue_timeout_ms == 0 {
            return Err(TriesteError::invalid_parameter(
                "queue_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
