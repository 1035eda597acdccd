//! Qualisys Track Manager analog stream
//!
//! QTM speaks the same terminated text protocol on its command port. Analog
//! channels are forwarded as raw float frames on a separate bridge port.

use biosig_types::DeviceFamily;

use crate::codec::FrameSource;
use crate::command::CommandResponse;
use crate::connection::{ConfigStep, ConnectionConfig};
use crate::error::DeviceError;
use crate::protocol::{LineClient, ProtocolProfile};
use crate::types::{Capabilities, ClientStatus, DeviceClient};

pub const COMMAND_PORT: u16 = 22223;
pub const ANALOG_DATA_PORT: u16 = 22224;
pub const DEFAULT_CHANNEL_COUNT: usize = 8;

/// Protocol version negotiated on connect
pub const PROTOCOL_VERSION: &str = "1.22";

pub const CONFIG_STEPS: &[ConfigStep] = &[ConfigStep {
    command: "Version 1.22",
    expect: "Version set to 1.22",
}];

static PROFILE: ProtocolProfile = ProtocolProfile {
    family: DeviceFamily::Qtm,
    default_control_port: COMMAND_PORT,
    default_data_port: ANALOG_DATA_PORT,
    default_channel_count: DEFAULT_CHANNEL_COUNT,
    config_steps: CONFIG_STEPS,
    start_command: "StreamFrames AllFrames Analog",
    stop_command: "StreamFrames Stop",
    quit_command: "Disconnect",
};

pub struct QtmClient {
    line: LineClient,
}

impl QtmClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            line: LineClient::new(&PROFILE, config),
        }
    }

    pub fn send_command(&mut self, command: &str) -> Result<CommandResponse, DeviceError> {
        self.line.command()?.send(command)
    }
}

impl DeviceClient for QtmClient {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Qtm
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            control_channel: true,
            sensor_discovery: false,
        }
    }

    fn channel_count(&self) -> usize {
        self.line.channel_count()
    }

    fn is_connected(&self) -> bool {
        self.line.is_connected()
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        self.line.connect()
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.line.disconnect()
    }

    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        self.line.start_streaming()
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        self.line.stop_streaming()
    }

    fn query_status(&self) -> ClientStatus {
        self.line.status()
    }

    fn open_frame_source(&mut self) -> Result<Box<dyn FrameSource>, DeviceError> {
        Ok(Box::new(self.line.frame_reader()?))
    }
}
