//! Configuration for response summaries.

use std::time::Duration;

/// Configuration for a `ResponseStateManager`.
#[derive(Clone, Debug)]
pub struct SummaryConfig {
    /// Debounce window before pending operations are flushed (in milliseconds).
    pub flush_delay_ms: u64,
    /// Capacity of the change-event channel.
    pub event_capacity: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: 100,
            event_capacity: 100,
        }
    }
}

impl SummaryConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

/// Builder for summary configuration.
pub struct SummaryConfigBuilder {
    config: SummaryConfig,
}

impl SummaryConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SummaryConfig::default(),
        }
    }

    pub fn flush_delay(mut self, ms: u64) -> Self {
        self.config.flush_delay_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> SummaryConfig {
        self.config
    }
}

impl Default for SummaryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
