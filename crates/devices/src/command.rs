//! Command/response channel on the control socket.
//!
//! The protocol is strictly half-duplex: one command goes out, exactly one
//! response comes back, and there are no request identifiers to correlate
//! anything else. `send` takes `&mut self` so a second command can never be
//! issued while a response is outstanding.

use std::io::{ErrorKind, Read, Write};

use log::{debug, trace};

use crate::error::{is_timeout, DeviceError, SocketRole};

/// A command packet ends with two consecutive CR-LF pairs.
pub const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Upper bound for a single response read.
pub const MAX_RESPONSE_LEN: usize = 1024;

/// Classification of a device response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    Invalid,
    CannotComplete,
    /// A value, e.g. the answer to a query
    Other,
}

impl ResponseKind {
    pub fn classify(text: &str) -> Self {
        match text {
            "OK" => ResponseKind::Ok,
            "INVALID COMMAND" => ResponseKind::Invalid,
            "CANNOT COMPLETE" => ResponseKind::CannotComplete,
            _ => ResponseKind::Other,
        }
    }
}

/// One response read from the control socket.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    raw: Vec<u8>,
    text: String,
    kind: ResponseKind,
}

impl CommandResponse {
    pub fn from_raw(raw: Vec<u8>) -> Self {
        let text = String::from_utf8_lossy(&raw).trim().to_string();
        let kind = ResponseKind::classify(&text);
        Self { raw, text, kind }
    }

    /// Bytes exactly as received
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Decoded text with surrounding whitespace stripped
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Ok
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Sends terminated text commands and reads one response per command.
pub struct CommandChannel<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S: Read + Write> CommandChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: vec![0u8; MAX_RESPONSE_LEN],
        }
    }

    /// Read the unsolicited message some devices send right after a connect.
    pub fn read_banner(&mut self) -> Result<String, DeviceError> {
        let response = self.read_response("connection banner")?;
        debug!("Device banner: {}", response.text());
        Ok(response.into_text())
    }

    /// Send one command and wait for its response.
    ///
    /// Fails with `DeviceError::InvalidCommand` when the device answers
    /// `INVALID COMMAND` or `CANNOT COMPLETE`; whether that is fatal is up to
    /// the caller.
    pub fn send(&mut self, command: &str) -> Result<CommandResponse, DeviceError> {
        let mut packet = Vec::with_capacity(command.len() + TERMINATOR.len());
        packet.extend_from_slice(command.as_bytes());
        packet.extend_from_slice(TERMINATOR);
        self.stream.write_all(&packet)?;
        self.stream.flush()?;

        let response = self.read_response(command)?;
        debug!("<{}> -> {}", command, response.text());

        match response.kind() {
            ResponseKind::Invalid | ResponseKind::CannotComplete => {
                Err(DeviceError::InvalidCommand {
                    command: command.to_string(),
                    response: response.into_text(),
                })
            }
            ResponseKind::Ok | ResponseKind::Other => Ok(response),
        }
    }

    /// Send a query and return the response text.
    pub fn query(&mut self, command: &str) -> Result<String, DeviceError> {
        self.send(command).map(CommandResponse::into_text)
    }

    /// Send a query and parse the response text.
    pub fn query_parsed<T: std::str::FromStr>(&mut self, command: &str) -> Result<T, DeviceError> {
        let text = self.query(command)?;
        text.parse().map_err(|_| {
            DeviceError::Protocol(format!(
                "<{}> returned '{}', expected a {}",
                command,
                text,
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn read_response(&mut self, awaiting: &str) -> Result<CommandResponse, DeviceError> {
        let n = loop {
            match self.stream.read(&mut self.buf) {
                Ok(0) => return Err(DeviceError::ConnectionClosed(SocketRole::Control)),
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(DeviceError::ReadTimeout(format!("response to <{}>", awaiting)))
                }
                Err(e) => return Err(e.into()),
            }
        };
        trace!("Read {} response bytes", n);
        Ok(CommandResponse::from_raw(self.buf[..n].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Records writes and replays one scripted reply per read.
    #[derive(Default)]
    struct Scripted {
        written: Vec<u8>,
        replies: VecDeque<Vec<u8>>,
    }

    impl Scripted {
        fn replying(replies: &[&str]) -> Self {
            Self {
                written: Vec::new(),
                replies: replies.iter().map(|r| r.as_bytes().to_vec()).collect(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.replies.pop_front() {
                Some(reply) => {
                    buf[..reply.len()].copy_from_slice(&reply);
                    Ok(reply.len())
                }
                None => Ok(0),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn appends_double_crlf_terminator() {
        let mut channel = CommandChannel::new(Scripted::replying(&["OK\r\n"]));
        channel.send("ENDIAN LITTLE").unwrap();
        assert_eq!(channel.get_ref().written, b"ENDIAN LITTLE\r\n\r\n");
    }

    #[test]
    fn ok_response_is_classified() {
        let mut channel = CommandChannel::new(Scripted::replying(&["OK\r\n\r\n"]));
        let response = channel.send("ENDIAN LITTLE").unwrap();
        assert!(response.is_ok());
        assert_eq!(response.text(), "OK");
        assert_eq!(response.raw(), b"OK\r\n\r\n");
    }

    #[test]
    fn invalid_command_preserves_command_text() {
        let mut channel = CommandChannel::new(Scripted::replying(&["INVALID COMMAND\r\n"]));
        let err = channel.send("ENDIAN LITTLE").unwrap_err();
        assert_eq!(
            err,
            DeviceError::InvalidCommand {
                command: "ENDIAN LITTLE".into(),
                response: "INVALID COMMAND".into(),
            }
        );
    }

    #[test]
    fn cannot_complete_is_rejected() {
        let mut channel = CommandChannel::new(Scripted::replying(&["CANNOT COMPLETE"]));
        assert!(matches!(
            channel.send("START"),
            Err(DeviceError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn query_values_are_returned_verbatim() {
        let mut channel = CommandChannel::new(Scripted::replying(&[" SP-W02C-1759 \r\n", "0.0135"]));
        assert_eq!(channel.query("BASE SERIAL?").unwrap(), "SP-W02C-1759");
        let interval: f64 = channel.query_parsed("FRAME INTERVAL?").unwrap();
        assert!((interval - 0.0135).abs() < 1e-12);
    }

    #[test]
    fn unparseable_query_is_a_protocol_error() {
        let mut channel = CommandChannel::new(Scripted::replying(&["YES"]));
        let err = channel.query_parsed::<u32>("SENSOR 1 MODE?").unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(msg) if msg.contains("SENSOR 1 MODE?")));
    }

    #[test]
    fn closed_connection_is_reported() {
        let mut channel = CommandChannel::new(Scripted::default());
        assert_eq!(
            channel.send("STOP"),
            Err(DeviceError::ConnectionClosed(SocketRole::Control))
        );
    }

    #[test]
    fn banner_is_read_without_sending() {
        let mut channel = CommandChannel::new(Scripted::replying(&["Welcome\r\n"]));
        assert_eq!(channel.read_banner().unwrap(), "Welcome");
        assert!(channel.get_ref().written.is_empty());
    }
}
