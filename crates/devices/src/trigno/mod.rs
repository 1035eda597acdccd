//! Delsys Trigno wireless EMG base station
//!
//! The base station serves a command port and an EMG data port. Every frame
//! on the data port carries one float per sensor slot, so the frame width is
//! fixed at 16 channels regardless of how many sensors are paired.

mod base;
mod sensor;

use std::sync::Arc;

use biosig_types::DeviceFamily;
use log::info;

use crate::codec::FrameSource;
use crate::command::CommandResponse;
use crate::connection::{ConfigStep, ConnectionConfig};
use crate::error::DeviceError;
use crate::protocol::{LineClient, ProtocolProfile};
use crate::types::{Capabilities, ClientStatus, DeviceClient};

pub use base::BaseStationInfo;
pub use sensor::{query_sensor, query_sensors, Channel, Sensor, SensorTable, SENSOR_SLOTS};

pub const COMMAND_PORT: u16 = 50040;
pub const EMG_DATA_PORT: u16 = 50043;

/// Little-endian samples, no resampling to legacy rates, upsampling on.
pub const CONFIG_STEPS: &[ConfigStep] = &[
    ConfigStep::ok("ENDIAN LITTLE"),
    ConfigStep::ok("BACKWARDS COMPATIBILITY OFF"),
    ConfigStep::ok("UPSAMPLE ON"),
];

static PROFILE: ProtocolProfile = ProtocolProfile {
    family: DeviceFamily::Trigno,
    default_control_port: COMMAND_PORT,
    default_data_port: EMG_DATA_PORT,
    default_channel_count: SENSOR_SLOTS,
    config_steps: CONFIG_STEPS,
    start_command: "START",
    stop_command: "STOP",
    quit_command: "QUIT",
};

pub struct TrignoClient {
    line: LineClient,
    base_station: Option<BaseStationInfo>,
    sensors: Arc<SensorTable>,
}

impl TrignoClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            line: LineClient::new(&PROFILE, config),
            base_station: None,
            sensors: Arc::new(SensorTable::default()),
        }
    }

    /// Query base station settings and derived sample rates.
    pub fn query_base_station(&mut self) -> Result<BaseStationInfo, DeviceError> {
        let info = BaseStationInfo::query(self.line.command()?)?;
        self.base_station = Some(info.clone());
        Ok(info)
    }

    /// Settings from the last [`TrignoClient::query_base_station`].
    pub fn base_station(&self) -> Option<&BaseStationInfo> {
        self.base_station.as_ref()
    }

    /// Query all 16 sensor slots.
    ///
    /// The table is only replaced once every slot has answered, so readers of
    /// [`TrignoClient::sensors`] never see a half-built table.
    pub fn query_sensors(&mut self) -> Result<Arc<SensorTable>, DeviceError> {
        let table = Arc::new(query_sensors(self.line.command()?)?);
        self.sensors = Arc::clone(&table);
        Ok(table)
    }

    pub fn sensors(&self) -> Arc<SensorTable> {
        Arc::clone(&self.sensors)
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.sensors.active_indices()
    }

    /// Send an arbitrary command on the control socket.
    pub fn send_command(&mut self, command: &str) -> Result<CommandResponse, DeviceError> {
        self.line.command()?.send(command)
    }

    pub fn banner(&self) -> Option<&str> {
        self.line.banner()
    }
}

impl DeviceClient for TrignoClient {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Trigno
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            control_channel: true,
            sensor_discovery: true,
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
        self.line.disconnect()?;
        self.base_station = None;
        self.sensors = Arc::new(SensorTable::default());
        Ok(())
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

    fn discover(&mut self) -> Result<(), DeviceError> {
        if !self.line.config().discover_sensors {
            info!("Sensor discovery disabled");
            return Ok(());
        }
        self.query_base_station()?;
        self.query_sensors()?;
        Ok(())
    }

    /// Sensor serial for occupied slots, `sensorN` otherwise.
    fn channel_labels(&self) -> Vec<String> {
        (1..=self.channel_count())
            .map(|i| match self.sensors.get(i) {
                Some(sensor) => sensor.serial.clone(),
                None => format!("sensor{}", i),
            })
            .collect()
    }

    fn sensor_serials(&self) -> Vec<String> {
        self.sensors.sensors().map(|s| s.serial.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_base_station_ports() {
        let client = TrignoClient::new(ConnectionConfig::default());
        assert_eq!(client.line.profile().default_control_port, 50040);
        assert_eq!(client.line.profile().default_data_port, 50043);
        assert_eq!(client.channel_count(), 16);
        assert!(client.active_indices().is_empty());
    }

    #[test]
    fn labels_fall_back_to_slot_numbers() {
        let client = TrignoClient::new(ConnectionConfig::default());
        let labels = client.channel_labels();
        assert_eq!(labels.len(), 16);
        assert_eq!(labels[0], "sensor1");
        assert_eq!(labels[15], "sensor16");
    }

    #[test]
    fn queries_require_connection() {
        let mut client = TrignoClient::new(ConnectionConfig::default());
        assert!(matches!(
            client.query_sensors(),
            Err(DeviceError::NotConnected(_))
        ));
        assert!(matches!(
            client.query_base_station(),
            Err(DeviceError::NotConnected(_))
        ));
    }
}
