//! Registry configuration

use std::time::Duration;

/// Tuning knobs for [`StreamRegistry`](super::StreamRegistry)
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Events buffered per subscriber before it counts as too slow and is dropped
    pub subscriber_queue_capacity: usize,

    /// Capacity of the publish start/stop event channel
    pub event_capacity: usize,

    /// Period of the background `cleanup_inactive` sweep
    pub cleanup_interval: Duration,

    /// Maximum number of stream keys held at once
    pub max_streams: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 1024,
            event_capacity: 256,
            cleanup_interval: Duration::from_secs(30),
            max_streams: 100,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-subscriber queue depth (at least 8, so catch-up always fits)
    pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity.max(8);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn max_streams(mut self, max: usize) -> Self {
        self.max_streams = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.max_streams, 100);
        assert_eq!(config.subscriber_queue_capacity, 1024);
    }

    #[test]
    fn test_builder_clamps_capacities() {
        let config = RegistryConfig::new()
            .subscriber_queue_capacity(2)
            .event_capacity(0)
            .cleanup_interval(Duration::from_millis(10))
            .max_streams(3);
        assert_eq!(config.subscriber_queue_capacity, 8);
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.cleanup_interval, Duration::from_millis(10));
        assert_eq!(config.max_streams, 3);
    }
}
