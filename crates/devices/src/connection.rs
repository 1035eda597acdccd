//! Socket ownership for a device client.
//!
//! A [`Connection`] holds the control socket (wrapped in a
//! [`CommandChannel`]) and the data socket. The data socket is only opened
//! after the control handshake has completed.

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::codec::FrameReader;
use crate::command::CommandChannel;
use crate::error::{is_timeout, DeviceError, SocketRole};

/// Connection parameters supplied by the configuration layer.
///
/// Ports and channel count fall back to the device family's defaults when
/// unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub control_port: Option<u16>,
    #[serde(default)]
    pub data_port: Option<u16>,
    /// Channels per frame, for families without a fixed count
    #[serde(default)]
    pub channel_count: Option<usize>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Read deadline for command responses
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Read deadline on the data socket. Bounds how long a stop waits for a
    /// blocked read to return.
    #[serde(default = "default_data_read_timeout_ms")]
    pub data_read_timeout_ms: u64,
    /// Query sensors right after connecting
    #[serde(default = "default_discover_sensors")]
    pub discover_sensors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_command_timeout_ms() -> u64 {
    5000
}
fn default_data_read_timeout_ms() -> u64 {
    250
}
fn default_discover_sensors() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            control_port: None,
            data_port: None,
            channel_count: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            data_read_timeout_ms: default_data_read_timeout_ms(),
            discover_sensors: default_discover_sensors(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_ports(mut self, control_port: u16, data_port: u16) -> Self {
        self.control_port = Some(control_port);
        self.data_port = Some(data_port);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn data_read_timeout(&self) -> Duration {
        Duration::from_millis(self.data_read_timeout_ms)
    }
}

/// A mandatory configuration command and the response that accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigStep {
    pub command: &'static str,
    pub expect: &'static str,
}

impl ConfigStep {
    /// A command the device must acknowledge with `OK`
    pub const fn ok(command: &'static str) -> Self {
        Self {
            command,
            expect: "OK",
        }
    }
}

/// Open a TCP stream, classifying timeouts separately from other failures.
pub fn open_stream(
    role: SocketRole,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, DeviceError> {
    let addr = format!("{}:{}", host, port);
    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|e| DeviceError::ConnectFailed {
            socket: role,
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY on {}: {}", role, e);
                }
                debug!("{} connected to {}", role, candidate);
                return Ok(stream);
            }
            Err(e) if is_timeout(&e) => {
                last_error = Some(DeviceError::ConnectionTimeout {
                    socket: role,
                    addr: addr.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(e) => {
                last_error = Some(DeviceError::ConnectFailed {
                    socket: role,
                    addr: addr.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(last_error.unwrap_or(DeviceError::ConnectFailed {
        socket: role,
        addr,
        reason: "host resolved to no addresses".to_string(),
    }))
}

/// Read and drop whatever is already buffered on `stream` without blocking.
fn discard_pending(stream: &TcpStream) -> Result<usize, DeviceError> {
    stream.set_nonblocking(true)?;
    let mut reader = stream;
    let mut buf = [0u8; 4096];
    let mut discarded = 0;
    let result = loop {
        match reader.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => discarded += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    stream.set_nonblocking(false)?;
    result?;
    Ok(discarded)
}

/// Control and data sockets of one client.
pub struct Connection {
    host: String,
    control_port: u16,
    data_port: u16,
    control: Option<CommandChannel<TcpStream>>,
    data: Option<TcpStream>,
    connected: bool,
}

impl Connection {
    pub fn new(host: impl Into<String>, control_port: u16, data_port: u16) -> Self {
        Self {
            host: host.into(),
            control_port,
            data_port,
            control: None,
            data: None,
            connected: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Open the control socket, read the banner, then open the data socket.
    ///
    /// Returns the banner text. On any failure every socket opened so far is
    /// closed again, so a retry starts clean.
    pub fn establish(&mut self, config: &ConnectionConfig) -> Result<String, DeviceError> {
        match self.open_both(config) {
            Ok(banner) => {
                self.connected = true;
                info!(
                    "Connected to {} (control {}, data {})",
                    self.host, self.control_port, self.data_port
                );
                Ok(banner)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Open only the data socket, for devices without a control channel.
    pub fn establish_data_only(&mut self, config: &ConnectionConfig) -> Result<(), DeviceError> {
        match self.open_data(config) {
            Ok(()) => {
                self.connected = true;
                info!("Connected to {} (data {})", self.host, self.data_port);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn open_both(&mut self, config: &ConnectionConfig) -> Result<String, DeviceError> {
        let control = open_stream(
            SocketRole::Control,
            &self.host,
            self.control_port,
            config.connect_timeout(),
        )?;
        control.set_read_timeout(Some(config.command_timeout()))?;
        let channel = self.control.insert(CommandChannel::new(control));

        // The device greets every new control connection; that message has
        // to be consumed before the first command goes out.
        let banner = channel.read_banner()?;

        self.open_data(config)?;
        Ok(banner)
    }

    fn open_data(&mut self, config: &ConnectionConfig) -> Result<(), DeviceError> {
        let data = open_stream(
            SocketRole::Data,
            &self.host,
            self.data_port,
            config.connect_timeout(),
        )?;
        data.set_read_timeout(Some(config.data_read_timeout()))?;
        self.data = Some(data);
        Ok(())
    }

    /// Run a device's mandatory configuration sequence.
    ///
    /// Every step must be answered with its expected response, otherwise the
    /// whole sequence fails with `DeviceError::Configuration`.
    pub fn configure(&mut self, steps: &[ConfigStep]) -> Result<(), DeviceError> {
        let channel = self.command()?;
        for step in steps {
            let response = match channel.send(step.command) {
                Ok(response) => response,
                Err(DeviceError::InvalidCommand { command, response }) => {
                    return Err(DeviceError::Configuration { command, response })
                }
                Err(e) => return Err(e),
            };
            if response.text() != step.expect {
                return Err(DeviceError::Configuration {
                    command: step.command.to_string(),
                    response: response.into_text(),
                });
            }
        }
        debug!("Applied {} configuration commands", steps.len());
        Ok(())
    }

    /// The command channel, if the control socket is open.
    pub fn command(&mut self) -> Result<&mut CommandChannel<TcpStream>, DeviceError> {
        self.control.as_mut().ok_or_else(|| {
            DeviceError::NotConnected(format!(
                "command socket to {}:{} is not open",
                self.host, self.control_port
            ))
        })
    }

    /// A frame reader over a second handle to the data socket.
    ///
    /// The reader can live on another thread while this connection keeps
    /// sending commands. Closing the connection shuts the socket down, which
    /// ends any read in progress on the cloned handle.
    pub fn frame_reader(&self, channel_count: usize) -> Result<FrameReader<TcpStream>, DeviceError> {
        Ok(FrameReader::new(self.data()?.try_clone()?, channel_count))
    }

    /// Drop whatever is buffered on the data socket.
    ///
    /// For devices that only stream between START and STOP, this removes the
    /// tail of a previous session so the next reader starts on a frame
    /// boundary. Returns the number of bytes discarded.
    pub fn discard_stale_data(&self) -> Result<usize, DeviceError> {
        let stale = discard_pending(self.data()?)?;
        if stale > 0 {
            debug!("Discarded {} stale bytes on the data socket", stale);
        }
        Ok(stale)
    }

    fn data(&self) -> Result<&TcpStream, DeviceError> {
        self.data.as_ref().ok_or_else(|| {
            DeviceError::NotConnected(format!(
                "data socket to {}:{} is not open",
                self.host, self.data_port
            ))
        })
    }

    /// Close both sockets. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(channel) = self.control.take() {
            let _ = channel.into_inner().shutdown(Shutdown::Both);
        }
        if let Some(data) = self.data.take() {
            let _ = data.shutdown(Shutdown::Both);
        }
        if self.connected {
            debug!("Closed sockets to {}", self.host);
        }
        self.connected = false;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn config_defaults_apply() {
        let config = ConnectionConfig::new("10.229.96.105");
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.control_port, None);
        assert!(config.discover_sensors);

        let config = config.with_ports(1, 2);
        assert_eq!((config.control_port, config.data_port), (Some(1), Some(2)));
    }

    #[test]
    fn refused_connection_names_the_socket() {
        // Bind then drop to get a port nobody is listening on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = open_stream(SocketRole::Data, "127.0.0.1", port, Duration::from_millis(500))
            .unwrap_err();
        match err {
            DeviceError::ConnectFailed { socket, addr, .. } => {
                assert_eq!(socket, SocketRole::Data);
                assert_eq!(addr, format!("127.0.0.1:{}", port));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn connect_timeout_names_the_socket() {
        use std::os::unix::io::AsRawFd;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        // Shrink the accept queue; once full, further handshakes go unanswered.
        assert_eq!(unsafe { libc::listen(listener.as_raw_fd(), 0) }, 0);
        let port = listener.local_addr().unwrap().port();

        let mut held = Vec::new();
        let err = loop {
            match open_stream(SocketRole::Control, "127.0.0.1", port, Duration::from_millis(200)) {
                Ok(stream) => {
                    held.push(stream);
                    assert!(held.len() < 64, "accept queue never filled");
                }
                Err(e) => break e,
            }
        };

        let message = err.to_string();
        assert!(message.contains("command socket"));
        assert!(message.contains(&format!("127.0.0.1:{}", port)));
        match err {
            DeviceError::ConnectionTimeout {
                socket,
                addr,
                timeout_ms,
            } => {
                assert_eq!(socket, SocketRole::Control);
                assert_eq!(addr, format!("127.0.0.1:{}", port));
                assert_eq!(timeout_ms, 200);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stale_bytes_are_discarded_before_a_new_reader() {
        use std::io::Write;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut conn = Connection::new("127.0.0.1", 0, port);
        conn.establish_data_only(&ConnectionConfig::default()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        // Half a frame left behind by an earlier session.
        peer.write_all(&[0xAB; 5]).unwrap();
        let mut probe = [0u8; 8];
        while conn.data.as_ref().unwrap().peek(&mut probe).unwrap_or(0) < 5 {}

        assert_eq!(conn.discard_stale_data().unwrap(), 5);
        let mut reader = conn.frame_reader(2).unwrap();
        let frame: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        peer.write_all(&frame).unwrap();

        let decoded = reader.read_frame().unwrap();
        assert_eq!(decoded.values(), &[1.0, 2.0]);
        assert_eq!(decoded.sequence, 0);
    }

    #[test]
    fn unopened_connection_has_no_command_channel() {
        let mut conn = Connection::new("127.0.0.1", 50040, 50043);
        assert!(!conn.is_connected());
        assert!(matches!(conn.command(), Err(DeviceError::NotConnected(_))));
        assert!(matches!(conn.frame_reader(16), Err(DeviceError::NotConnected(_))));
        assert!(matches!(conn.discard_stale_data(), Err(DeviceError::NotConnected(_))));
        conn.close();
        conn.close();
    }
}
