use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime settings of a streaming controller.
///
/// Resolved once by the embedding application and passed in explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the frame delivery queue. `None` makes it unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: Option<usize>,
    /// How long a paused worker sleeps between state checks
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,
    /// How long the worker waits on a full queue before re-checking state
    #[serde(default = "default_send_poll_interval_ms")]
    pub send_poll_interval_ms: u64,
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

fn default_queue_capacity() -> Option<usize> {
    Some(1024)
}
fn default_pause_poll_interval_ms() -> u64 {
    10
}
fn default_send_poll_interval_ms() -> u64 {
    50
}
fn default_worker_name() -> String {
    "acquisition".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            send_poll_interval_ms: default_send_poll_interval_ms(),
            worker_name: default_worker_name(),
        }
    }
}

impl StreamConfig {
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn send_poll_interval(&self) -> Duration {
        Duration::from_millis(self.send_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: StreamConfig = serde_json::from_str(r#"{"worker_name":"emg"}"#).unwrap();
        assert_eq!(config.queue_capacity, Some(1024));
        assert_eq!(config.pause_poll_interval(), Duration::from_millis(10));
        assert_eq!(config.worker_name, "emg");
    }

    #[test]
    fn null_capacity_means_unbounded() {
        let config: StreamConfig = serde_json::from_str(r#"{"queue_capacity":null}"#).unwrap();
        assert_eq!(config.queue_capacity, None);
    }
}
