//! Watcher configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the ChangeWatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Quiet period after the last event before a file is reprocessed
    #[serde(rename = "debounce-ms", default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Capacity of the bounded event queue between notify and the driver
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WatcherConfig {
    /// Get the debounce window as a Duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::default();
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn test_debounce_duration() {
        let config = WatcherConfig {
            debounce_ms: 50,
            ..Default::default()
        };
        assert_eq!(config.debounce(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_yaml() {
        let config: WatcherConfig = serde_yaml::from_str("debounce-ms: 75\n").unwrap();
        assert_eq!(config.debounce_ms, 75);
        assert_eq!(config.queue_capacity, 256);
    }
}
