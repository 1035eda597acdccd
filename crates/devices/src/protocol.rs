//! Shared implementation of the line-oriented command protocol.
//!
//! Device families that speak text commands on a control socket and stream
//! binary frames on a data socket differ only in ports, the configuration
//! sequence and the words used for start/stop/quit. A [`ProtocolProfile`]
//! captures those differences and [`LineClient`] implements the rest once.

use std::net::TcpStream;

use biosig_types::DeviceFamily;
use log::{info, warn};

use crate::codec::FrameReader;
use crate::command::CommandChannel;
use crate::connection::{ConfigStep, Connection, ConnectionConfig};
use crate::error::DeviceError;
use crate::types::ClientStatus;

/// Wire-level description of one device family.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolProfile {
    pub family: DeviceFamily,
    pub default_control_port: u16,
    pub default_data_port: u16,
    pub default_channel_count: usize,
    pub config_steps: &'static [ConfigStep],
    pub start_command: &'static str,
    pub stop_command: &'static str,
    pub quit_command: &'static str,
}

/// Client core for a [`ProtocolProfile`].
pub struct LineClient {
    profile: &'static ProtocolProfile,
    config: ConnectionConfig,
    conn: Connection,
    channel_count: usize,
    status: ClientStatus,
    banner: Option<String>,
}

impl LineClient {
    pub fn new(profile: &'static ProtocolProfile, config: ConnectionConfig) -> Self {
        let conn = Connection::new(
            config.host.clone(),
            config.control_port.unwrap_or(profile.default_control_port),
            config.data_port.unwrap_or(profile.default_data_port),
        );
        let channel_count = config.channel_count.unwrap_or(profile.default_channel_count);
        Self {
            profile,
            config,
            conn,
            channel_count,
            status: ClientStatus::Disconnected,
            banner: None,
        }
    }

    pub fn profile(&self) -> &'static ProtocolProfile {
        self.profile
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn status(&self) -> ClientStatus {
        self.status.clone()
    }

    /// Banner received on the most recent connect
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Connect both sockets and run the configuration sequence.
    ///
    /// Does nothing when already connected. A configuration failure closes
    /// both sockets before returning.
    pub fn connect(&mut self) -> Result<(), DeviceError> {
        if self.conn.is_connected() {
            return Ok(());
        }
        if self.channel_count == 0 {
            return Err(DeviceError::Protocol(format!(
                "{} client configured with zero channels",
                self.profile.family
            )));
        }

        info!(
            "Connecting to {} at {}",
            self.profile.family,
            self.conn.host()
        );
        let result = self
            .conn
            .establish(&self.config)
            .and_then(|banner| {
                self.banner = Some(banner);
                self.conn.configure(self.profile.config_steps)
            });

        match result {
            Ok(()) => {
                info!("{} configuration successful", self.profile.family);
                self.status = ClientStatus::Connected;
                Ok(())
            }
            Err(e) => {
                self.conn.close();
                self.status = ClientStatus::Error(e.to_string());
                Err(e)
            }
        }
    }

    /// Send the quit command if connected, then close both sockets.
    pub fn disconnect(&mut self) -> Result<(), DeviceError> {
        if self.conn.is_connected() {
            if let Err(e) = self.conn.command()?.send(self.profile.quit_command) {
                warn!(
                    "<{}> failed while disconnecting from {}: {}",
                    self.profile.quit_command, self.profile.family, e
                );
            }
            info!("Disconnected from {}", self.profile.family);
        }
        self.conn.close();
        self.status = ClientStatus::Disconnected;
        Ok(())
    }

    pub fn start_streaming(&mut self) -> Result<(), DeviceError> {
        self.streaming_command(self.profile.start_command)?;
        self.status = ClientStatus::Streaming;
        Ok(())
    }

    pub fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        self.streaming_command(self.profile.stop_command)?;
        self.status = ClientStatus::Connected;
        Ok(())
    }

    fn streaming_command(&mut self, command: &str) -> Result<(), DeviceError> {
        if !self.conn.is_connected() {
            return Err(DeviceError::NotConnected(format!(
                "cannot send <{}>, {} is not connected",
                command, self.profile.family
            )));
        }
        let response = self.conn.command()?.send(command)?;
        if !response.is_ok() {
            warn!("<{}> answered with '{}'", command, response.text());
        }
        Ok(())
    }

    /// The command channel, for device-specific queries.
    pub fn command(&mut self) -> Result<&mut CommandChannel<TcpStream>, DeviceError> {
        if !self.conn.is_connected() {
            return Err(DeviceError::NotConnected(format!(
                "{} is not connected",
                self.profile.family
            )));
        }
        self.conn.command()
    }

    /// Reader for the next session. Anything the device sent after the
    /// previous STOP is dropped first.
    pub fn frame_reader(&self) -> Result<FrameReader<TcpStream>, DeviceError> {
        self.conn.discard_stale_data()?;
        self.conn.frame_reader(self.channel_count)
    }
}
