//! Error types for the device clients.

use std::fmt;
use std::io;

use biosig_types::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which of a client's two sockets an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketRole {
    /// Command/response connection
    Control,
    /// Binary frame stream
    Data,
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketRole::Control => f.write_str("command socket"),
            SocketRole::Data => f.write_str("data socket"),
        }
    }
}

/// Errors that can occur while talking to a device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Socket connect exceeded its timeout
    #[error("{socket} timed out connecting to {addr} after {timeout_ms} ms")]
    ConnectionTimeout {
        socket: SocketRole,
        addr: String,
        timeout_ms: u64,
    },
    /// Socket connect failed for a reason other than a timeout
    #[error("{socket} failed to connect to {addr}: {reason}")]
    ConnectFailed {
        socket: SocketRole,
        addr: String,
        reason: String,
    },
    /// Operation requires an active connection
    #[error("Not connected: {0}")]
    NotConnected(String),
    /// The device answered INVALID COMMAND or CANNOT COMPLETE
    #[error("<{command}> was rejected by the device. Response: {response}")]
    InvalidCommand { command: String, response: String },
    /// A mandatory startup command did not return the expected response
    #[error("Configuration command <{command}> failed. Response: {response}")]
    Configuration { command: String, response: String },
    /// The data connection closed before a full frame arrived
    #[error("Data connection closed after {received} of {expected} frame bytes")]
    ShortRead { expected: usize, received: usize },
    /// The peer closed a connection while a response was expected
    #[error("Connection closed by peer on {0}")]
    ConnectionClosed(SocketRole),
    /// A read deadline passed without data
    #[error("Timed out waiting for {0}")]
    ReadTimeout(String),
    /// The device answered with something that could not be interpreted
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl DeviceError {
    /// Classification used in lifecycle events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            DeviceError::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            DeviceError::NotConnected(_) => ErrorKind::NotConnected,
            DeviceError::InvalidCommand { .. } => ErrorKind::InvalidCommand,
            DeviceError::Configuration { .. } => ErrorKind::Configuration,
            DeviceError::ShortRead { .. } | DeviceError::ConnectionClosed(_) => {
                ErrorKind::ConnectionClosed
            }
            DeviceError::ReadTimeout(_) => ErrorKind::Timeout,
            DeviceError::Protocol(_) => ErrorKind::Protocol,
            DeviceError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::ReadTimeout(_))
    }
}

impl From<io::Error> for DeviceError {
    fn from(err: io::Error) -> Self {
        DeviceError::Io(err.to_string())
    }
}

/// Whether an I/O error is a read deadline expiring.
///
/// Unix reports `WouldBlock` for an expired `SO_RCVTIMEO`, Windows reports
/// `TimedOut`.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_socket_and_address() {
        let err = DeviceError::ConnectionTimeout {
            socket: SocketRole::Control,
            addr: "10.0.0.5:50040".into(),
            timeout_ms: 3000,
        };
        assert_eq!(
            err.to_string(),
            "command socket timed out connecting to 10.0.0.5:50040 after 3000 ms"
        );
        assert_eq!(err.kind(), ErrorKind::ConnectionTimeout);
    }

    #[test]
    fn invalid_command_keeps_command_and_response() {
        let err = DeviceError::InvalidCommand {
            command: "ENDIAN LITTLE".into(),
            response: "INVALID COMMAND".into(),
        };
        assert!(err.to_string().contains("<ENDIAN LITTLE>"));
        assert!(err.to_string().contains("INVALID COMMAND"));
    }

    #[test]
    fn io_timeouts_are_recognized() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }
}
