//! Sensor discovery for the Trigno base station.

use std::io::{Read, Write};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::command::CommandChannel;
use crate::error::DeviceError;

/// Number of sensor slots on a base station.
pub const SENSOR_SLOTS: usize = 16;

/// Sensor type reported by trigger modules
const TRIGGER_SENSOR_TYPE: &str = "25";
/// SIG raw, one channel at 2222 Hz
const TRIGGER_MODE: u32 = 41;
/// EMG only at 2148 Hz
const EMG_MODE: u32 = 40;
/// Upper bound on native channels reported by one sensor
pub const MAX_SENSOR_CHANNELS: u32 = 32;

/// One native channel of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub gain: f64,
    /// Samples per frame at the sensor's native rate
    pub native_samples: u32,
    pub native_rate: f64,
    pub units: String,
}

/// A paired, active sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Slot on the base station, 1-based
    pub index: usize,
    pub serial: String,
    pub sensor_type: String,
    pub mode: u32,
    pub firmware: String,
    pub emg_channel_count: u32,
    pub aux_channel_count: u32,
    pub start_index: u32,
    pub channels: Vec<Channel>,
}

impl Sensor {
    pub fn is_trigger(&self) -> bool {
        self.sensor_type == TRIGGER_SENSOR_TYPE
    }
}

/// Snapshot of every sensor slot. Empty slots hold no sensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorTable {
    slots: [Option<Sensor>; SENSOR_SLOTS],
}

impl SensorTable {
    /// Sensor in slot `index` (1-based).
    pub fn get(&self, index: usize) -> Option<&Sensor> {
        index
            .checked_sub(1)
            .and_then(|slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    pub fn insert(&mut self, sensor: Sensor) -> Result<(), DeviceError> {
        let slot = sensor
            .index
            .checked_sub(1)
            .filter(|slot| *slot < SENSOR_SLOTS)
            .ok_or_else(|| {
                DeviceError::Protocol(format!("sensor index {} out of range", sensor.index))
            })?;
        self.slots[slot] = Some(sensor);
        Ok(())
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.slots.iter().flatten()
    }

    /// Slots holding a sensor, ascending.
    pub fn active_indices(&self) -> Vec<usize> {
        self.sensors().map(|s| s.index).collect()
    }

    pub fn len(&self) -> usize {
        self.sensors().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Query one sensor slot. Returns `None` if the slot is unpaired or inactive.
///
/// Forces the acquisition mode: trigger modules are set to SIG raw, every
/// other sensor to EMG only.
pub fn query_sensor<S: Read + Write>(
    channel: &mut CommandChannel<S>,
    index: usize,
) -> Result<Option<Sensor>, DeviceError> {
    let cmd = |what: &str| format!("SENSOR {} {}", index, what);

    if channel.query(&cmd("PAIRED?"))? == "NO" {
        return Ok(None);
    }
    if channel.query(&cmd("ACTIVE?"))? == "NO" {
        return Ok(None);
    }

    let sensor_type = channel.query(&cmd("TYPE?"))?;
    let mode = if sensor_type == TRIGGER_SENSOR_TYPE {
        TRIGGER_MODE
    } else {
        EMG_MODE
    };
    match channel.send(&cmd(&format!("SETMODE {}", mode))) {
        Ok(_) => {}
        Err(DeviceError::InvalidCommand { command, response }) => {
            warn!("<{}> not accepted: {}", command, response);
        }
        Err(e) => return Err(e),
    }

    let mode = channel.query_parsed(&cmd("MODE?"))?;
    let serial = channel.query(&cmd("SERIAL?"))?;
    let firmware = channel.query(&cmd("FIRMWARE?"))?;
    let emg_channel_count: u32 = channel.query_parsed(&cmd("EMGCHANNELCOUNT?"))?;
    let aux_channel_count: u32 = channel.query_parsed(&cmd("AUXCHANNELCOUNT?"))?;
    let start_index = channel.query_parsed(&cmd("STARTINDEX?"))?;
    let channel_count: u32 = channel.query_parsed(&cmd("CHANNELCOUNT?"))?;
    let declared = u64::from(emg_channel_count) + u64::from(aux_channel_count);
    if u64::from(channel_count) > declared.min(u64::from(MAX_SENSOR_CHANNELS)) {
        return Err(DeviceError::Protocol(format!(
            "sensor {} reports {} channels but {} EMG and {} auxiliary",
            index, channel_count, emg_channel_count, aux_channel_count
        )));
    }

    let mut channels = Vec::with_capacity(channel_count as usize);
    for j in 1..=channel_count {
        let ch = |what: &str| cmd(&format!("CHANNEL {} {}", j, what));
        channels.push(Channel {
            gain: channel.query_parsed(&ch("GAIN?"))?,
            native_samples: channel.query_parsed(&ch("SAMPLES?"))?,
            native_rate: channel.query_parsed(&ch("RATE?"))?,
            units: channel.query(&ch("UNITS?"))?,
        });
    }

    debug!(
        "Sensor {}: serial {}, type {}, mode {}, {} channels",
        index, serial, sensor_type, mode, channel_count
    );
    Ok(Some(Sensor {
        index,
        serial,
        sensor_type,
        mode,
        firmware,
        emg_channel_count,
        aux_channel_count,
        start_index,
        channels,
    }))
}

/// Query every sensor slot and build a fresh table.
pub fn query_sensors<S: Read + Write>(
    channel: &mut CommandChannel<S>,
) -> Result<SensorTable, DeviceError> {
    let mut table = SensorTable::default();
    for index in 1..=SENSOR_SLOTS {
        if let Some(sensor) = query_sensor(channel, index)? {
            table.insert(sensor)?;
        }
    }
    info!(
        "Discovered {} sensors at indices {:?}",
        table.len(),
        table.active_indices()
    );
    Ok(table)
}
