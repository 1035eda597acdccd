//! Generic analog amplifier behind a TCP data bridge
//!
//! The bridge only forwards frames; there is no control socket. Start and
//! stop are bookkeeping on this side of the connection.

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use biosig_types::DeviceFamily;
use log::info;

use crate::codec::{FrameReader, FrameSource};
use crate::connection::{Connection, ConnectionConfig};
use crate::error::DeviceError;
use crate::types::{Capabilities, ClientStatus, DeviceClient};

pub const DATA_PORT: u16 = 50043;
pub const DEFAULT_CHANNEL_COUNT: usize = 16;

/// Data socket handle that counts the bytes it hands out.
struct CountingStream {
    inner: TcpStream,
    consumed: Arc<AtomicU64>,
}

impl Read for CountingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }
}

pub struct AnalogClient {
    config: ConnectionConfig,
    conn: Connection,
    channel_count: usize,
    streaming: bool,
    status: ClientStatus,
    /// Bytes read from the bridge since connecting. The bridge never pauses,
    /// so each new reader realigns against this count.
    consumed: Arc<AtomicU64>,
}

impl AnalogClient {
    pub fn new(config: ConnectionConfig) -> Self {
        let conn = Connection::new(
            config.host.clone(),
            0,
            config.data_port.unwrap_or(DATA_PORT),
        );
        let channel_count = config.channel_count.unwrap_or(DEFAULT_CHANNEL_COUNT);
        Self {
            config,
            conn,
            channel_count,
            streaming: false,
            status: ClientStatus::Disconnected,
            consumed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn require_connection(&self, action: &str) -> Result<(), DeviceError> {
        if self.conn.is_connected() {
            Ok(())
        } else {
            Err(DeviceError::NotConnected(format!(
                "cannot {} stream, analog bridge is not connected",
                action
            )))
        }
    }
}

impl DeviceClient for AnalogClient {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Analog
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            control_channel: false,
            sensor_discovery: false,
        }
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        if self.conn.is_connected() {
            return Ok(());
        }
        if self.channel_count == 0 {
            return Err(DeviceError::Protocol(
                "analog client configured with zero channels".to_string(),
            ));
        }
        match self.conn.establish_data_only(&self.config) {
            Ok(()) => {
                self.consumed = Arc::new(AtomicU64::new(0));
                self.status = ClientStatus::Connected;
                Ok(())
            }
            Err(e) => {
                self.status = ClientStatus::Error(e.to_string());
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        if self.conn.is_connected() {
            info!("Disconnected from analog bridge");
        }
        self.conn.close();
        self.streaming = false;
        self.status = ClientStatus::Disconnected;
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        self.require_connection("start")?;
        self.streaming = true;
        self.status = ClientStatus::Streaming;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        self.require_connection("stop")?;
        self.streaming = false;
        self.status = ClientStatus::Connected;
        Ok(())
    }

    fn query_status(&self) -> ClientStatus {
        self.status.clone()
    }

    fn open_frame_source(&mut self) -> Result<Box<dyn FrameSource>, DeviceError> {
        let stream = self.conn.frame_reader(self.channel_count)?.into_inner();
        let offset = self.consumed.load(Ordering::Acquire);
        let counted = CountingStream {
            inner: stream,
            consumed: Arc::clone(&self.consumed),
        };
        Ok(Box::new(FrameReader::resuming(
            counted,
            self.channel_count,
            offset,
        )))
    }
}
