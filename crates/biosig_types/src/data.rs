use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One synchronized sample across every channel of a device.
///
/// Frames are immutable once decoded. The values live behind an `Arc` so a
/// frame can be handed to the delivery queue, the recorder and any number of
/// consumers without copying the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position of this frame within its streaming session, starting at 0.
    /// Consumers can use it to detect gaps.
    pub sequence: u64,
    values: Arc<[f32]>,
}

impl Frame {
    pub fn new(sequence: u64, values: impl Into<Arc<[f32]>>) -> Self {
        Self {
            sequence,
            values: values.into(),
        }
    }

    /// Channel values in device channel order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn channel_count(&self) -> usize {
        self.values.len()
    }
}

/// State of a streaming controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamState {
    /// No worker is reading. Initial state and the end of every session.
    #[default]
    Stopped,
    /// The worker is reading and delivering frames.
    Running,
    /// The worker is alive but idle; no socket I/O happens.
    Paused,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Stopped => "stopped",
            StreamState::Running => "running",
            StreamState::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clones_share_samples() {
        let frame = Frame::new(3, vec![1.0, 2.0, 3.0]);
        let copy = frame.clone();
        assert_eq!(copy.values().as_ptr(), frame.values().as_ptr());
        assert_eq!(copy.channel_count(), 3);
        assert_eq!(copy.sequence, 3);
    }

    #[test]
    fn stream_state_defaults_to_stopped() {
        assert_eq!(StreamState::default(), StreamState::Stopped);
        assert_eq!(StreamState::Paused.to_string(), "paused");
    }
}
