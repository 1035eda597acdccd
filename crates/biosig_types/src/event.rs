//! Lifecycle events emitted by the acquisition layer
//!
//! Consumers (a UI, the daemon's log) receive these over an event queue. They
//! never carry frame data; frames travel on the delivery queue.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DeviceFamily;

/// Coarse classification of a failure, stable enough for a UI to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// A socket connect exceeded its timeout. The caller may retry.
    ConnectionTimeout,
    /// A socket could not be opened for another reason.
    ConnectFailed,
    /// An operation needed a connection that was not there.
    NotConnected,
    /// The device rejected a command.
    InvalidCommand,
    /// A mandatory startup command did not succeed.
    Configuration,
    /// The peer closed a connection mid-message.
    ConnectionClosed,
    /// A read deadline passed without data.
    Timeout,
    /// The device answered with something that could not be interpreted.
    Protocol,
    /// Any other I/O failure.
    Io,
    /// Writing the session files failed.
    Recorder,
    /// The acquisition worker could not be managed.
    Worker,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events emitted by a device manager and its streaming controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DeviceEvent {
    Connected { family: DeviceFamily },
    Disconnected { family: DeviceFamily },
    StreamingStarted,
    StreamingPaused,
    StreamingResumed,
    StreamingStopped,
    Error { kind: ErrorKind, detail: String },
}

impl DeviceEvent {
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        DeviceEvent::Error {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DeviceEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&DeviceEvent::error(ErrorKind::Timeout, "data socket"))
            .unwrap();
        assert_eq!(
            json,
            r#"{"event":"error","kind":"timeout","detail":"data socket"}"#
        );

        let json = serde_json::to_string(&DeviceEvent::Connected {
            family: DeviceFamily::Trigno,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"connected","family":"trigno"}"#);
    }
}
