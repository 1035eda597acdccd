use std::io::{Read, Write};

use log::info;
use serde::{Deserialize, Serialize};

use crate::command::CommandChannel;
use crate::error::DeviceError;

/// Base station settings reported after configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseStationInfo {
    pub backwards_compatibility: String,
    pub upsampling: String,
    /// Seconds between frames
    pub frame_interval: f64,
    /// Expected maximum EMG samples per frame
    pub max_samples_emg: f64,
    /// Expected maximum auxiliary samples per frame
    pub max_samples_aux: f64,
    pub endianness: String,
    pub firmware: String,
    pub serial: String,
}

impl BaseStationInfo {
    pub fn query<S: Read + Write>(channel: &mut CommandChannel<S>) -> Result<Self, DeviceError> {
        let info = Self {
            backwards_compatibility: channel.query("BACKWARDS COMPATIBILITY?")?,
            upsampling: channel.query("UPSAMPLING?")?,
            frame_interval: channel.query_parsed("FRAME INTERVAL?")?,
            max_samples_emg: channel.query_parsed("MAX SAMPLES EMG?")?,
            max_samples_aux: channel.query_parsed("MAX SAMPLES AUX?")?,
            endianness: channel.query("ENDIANNESS?")?,
            firmware: channel.query("BASE FIRMWARE?")?,
            serial: channel.query("BASE SERIAL?")?,
        };
        if info.frame_interval <= 0.0 {
            return Err(DeviceError::Protocol(format!(
                "base station reported frame interval {}",
                info.frame_interval
            )));
        }
        info!(
            "Base station {} (firmware {}): EMG {:.1} Hz, AUX {:.1} Hz",
            info.serial,
            info.firmware,
            info.emg_sample_rate(),
            info.aux_sample_rate()
        );
        Ok(info)
    }

    pub fn emg_sample_rate(&self) -> f64 {
        self.max_samples_emg / self.frame_interval
    }

    pub fn aux_sample_rate(&self) -> f64 {
        self.max_samples_aux / self.frame_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(frame_interval: f64) -> BaseStationInfo {
        BaseStationInfo {
            backwards_compatibility: "NO".into(),
            upsampling: "YES".into(),
            frame_interval,
            max_samples_emg: 27.0,
            max_samples_aux: 2.0,
            endianness: "LITTLE".into(),
            firmware: "MA2919".into(),
            serial: "SP-W02C-1759".into(),
        }
    }

    #[test]
    fn sample_rates_derive_from_frame_interval() {
        let info = info(0.0135);
        assert!((info.emg_sample_rate() - 2000.0).abs() < 1e-9);
        assert!((info.aux_sample_rate() - 148.148_148).abs() < 1e-3);
    }
}
