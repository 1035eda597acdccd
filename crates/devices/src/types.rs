//! Common types and traits for device clients

use biosig_types::DeviceFamily;

use crate::analog::AnalogClient;
use crate::codec::FrameSource;
use crate::connection::ConnectionConfig;
use crate::error::DeviceError;
use crate::qtm::QtmClient;
use crate::trigno::TrignoClient;

/// Status of a device client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientStatus {
    /// No sockets are open
    Disconnected,
    /// Connected and configured, not streaming
    Connected,
    /// The device has been told to stream
    Streaming,
    /// The last connect attempt failed
    Error(String),
}

/// What a device family supports beyond the common lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Commands travel over a control socket
    pub control_channel: bool,
    /// Sensors can be enumerated and configured individually
    pub sensor_discovery: bool,
}

/// Trait that every device family implements.
///
/// Control operations are blocking and must be serialized by the caller (the
/// device manager keeps each client behind a mutex). Frame reading happens
/// on a separate handle obtained from [`DeviceClient::open_frame_source`], so
/// the acquisition worker never needs the client itself.
pub trait DeviceClient: Send + 'static {
    fn family(&self) -> DeviceFamily;

    fn capabilities(&self) -> Capabilities;

    /// Channels per frame on the data socket.
    fn channel_count(&self) -> usize;

    fn is_connected(&self) -> bool;

    /// Open the connections and configure the device. Idempotent.
    fn connect(&mut self) -> Result<(), DeviceError>;

    /// Close the connections. Idempotent.
    fn disconnect(&mut self) -> Result<(), DeviceError>;

    /// Tell the device to begin streaming frames.
    fn start_streaming(&mut self) -> Result<(), DeviceError>;

    /// Tell the device to stop streaming frames.
    fn stop_streaming(&mut self) -> Result<(), DeviceError>;

    fn query_status(&self) -> ClientStatus;

    /// A frame source reading from the data connection, owned by the worker.
    fn open_frame_source(&mut self) -> Result<Box<dyn FrameSource>, DeviceError>;

    /// Device-specific discovery run after a successful connect.
    fn discover(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// One identifier per frame channel, used as the recording header.
    fn channel_labels(&self) -> Vec<String> {
        (1..=self.channel_count()).map(|i| format!("ch{}", i)).collect()
    }

    /// Serial numbers of the sensors behind this client, if it knows them.
    fn sensor_serials(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A client for any supported device family.
pub enum AnyClient {
    Trigno(TrignoClient),
    Qtm(QtmClient),
    Analog(AnalogClient),
}

macro_rules! dispatch {
    ($self:ident, $client:ident => $body:expr) => {
        match $self {
            AnyClient::Trigno($client) => $body,
            AnyClient::Qtm($client) => $body,
            AnyClient::Analog($client) => $body,
        }
    };
}

impl AnyClient {
    pub fn as_trigno(&self) -> Option<&TrignoClient> {
        match self {
            AnyClient::Trigno(client) => Some(client),
            _ => None,
        }
    }

    pub fn as_trigno_mut(&mut self) -> Option<&mut TrignoClient> {
        match self {
            AnyClient::Trigno(client) => Some(client),
            _ => None,
        }
    }
}

impl DeviceClient for AnyClient {
    fn family(&self) -> DeviceFamily {
        dispatch!(self, c => c.family())
    }

    fn capabilities(&self) -> Capabilities {
        dispatch!(self, c => c.capabilities())
    }

    fn channel_count(&self) -> usize {
        dispatch!(self, c => c.channel_count())
    }

    fn is_connected(&self) -> bool {
        dispatch!(self, c => c.is_connected())
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        dispatch!(self, c => c.connect())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        dispatch!(self, c => c.disconnect())
    }

    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        dispatch!(self, c => c.start_streaming())
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        dispatch!(self, c => c.stop_streaming())
    }

    fn query_status(&self) -> ClientStatus {
        dispatch!(self, c => c.query_status())
    }

    fn open_frame_source(&mut self) -> Result<Box<dyn FrameSource>, DeviceError> {
        dispatch!(self, c => c.open_frame_source())
    }

    fn discover(&mut self) -> Result<(), DeviceError> {
        dispatch!(self, c => c.discover())
    }

    fn channel_labels(&self) -> Vec<String> {
        dispatch!(self, c => c.channel_labels())
    }

    fn sensor_serials(&self) -> Vec<String> {
        dispatch!(self, c => c.sensor_serials())
    }
}

/// Build the client for a device family.
pub fn create_client(family: DeviceFamily, config: ConnectionConfig) -> AnyClient {
    match family {
        DeviceFamily::Trigno => AnyClient::Trigno(TrignoClient::new(config)),
        DeviceFamily::Qtm => AnyClient::Qtm(QtmClient::new(config)),
        DeviceFamily::Analog => AnyClient::Analog(AnalogClient::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_client_picks_family() {
        let config = ConnectionConfig::default();
        for family in [DeviceFamily::Trigno, DeviceFamily::Qtm, DeviceFamily::Analog] {
            let client = create_client(family, config.clone());
            assert_eq!(client.family(), family);
            assert!(!client.is_connected());
            assert_eq!(client.query_status(), ClientStatus::Disconnected);
        }
    }

    #[test]
    fn capabilities_follow_the_family() {
        let config = ConnectionConfig::default();
        let trigno = create_client(DeviceFamily::Trigno, config.clone());
        assert!(trigno.capabilities().sensor_discovery);
        assert_eq!(trigno.channel_count(), 16);

        let analog = create_client(DeviceFamily::Analog, config);
        assert!(!analog.capabilities().control_channel);
        assert_eq!(analog.channel_labels().len(), analog.channel_count());
    }

    #[test]
    fn start_requires_connection() {
        let mut client = create_client(DeviceFamily::Qtm, ConnectionConfig::default());
        assert!(matches!(
            client.start_streaming(),
            Err(DeviceError::NotConnected(_))
        ));
    }
}
