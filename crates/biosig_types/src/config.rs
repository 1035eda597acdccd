//! Configuration types shared between the acquisition layer and its collaborators

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Device families supported by the acquisition layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceFamily {
    /// Delsys Trigno EMG base station
    Trigno,
    /// Qualisys Track Manager motion capture (analog stream)
    Qtm,
    /// Generic analog amplifier reached through a TCP data bridge
    Analog,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceFamily::Trigno => "trigno",
            DeviceFamily::Qtm => "qtm",
            DeviceFamily::Analog => "analog",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trigno" => Ok(DeviceFamily::Trigno),
            "qtm" => Ok(DeviceFamily::Qtm),
            "analog" => Ok(DeviceFamily::Analog),
            other => Err(format!(
                "unknown device family '{}', expected trigno, qtm or analog",
                other
            )),
        }
    }
}

/// Placement metadata for one EMG sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorMeta {
    #[serde(default)]
    pub muscle_name: String,
    #[serde(default)]
    pub side: String,
}

/// Session metadata supplied by the configuration layer.
///
/// Decides whether and where frames are persisted. When `save_dir` is unset
/// nothing is written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory receiving the frame file and the metadata sidecar
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
    /// Sensor placement keyed by sensor serial
    #[serde(default)]
    pub sensor_map: BTreeMap<String, SensorMeta>,
    /// Write a header line of channel identifiers before the first frame
    #[serde(default = "default_write_header")]
    pub write_header: bool,
}

fn default_write_header() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_dir: None,
            sensor_map: BTreeMap::new(),
            write_header: default_write_header(),
        }
    }
}

impl SessionConfig {
    pub fn recording_to(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: Some(save_dir.into()),
            ..Self::default()
        }
    }

    pub fn is_recording(&self) -> bool {
        self.save_dir.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_parses_case_insensitively() {
        assert_eq!("Trigno".parse::<DeviceFamily>(), Ok(DeviceFamily::Trigno));
        assert_eq!("QTM".parse::<DeviceFamily>(), Ok(DeviceFamily::Qtm));
        assert!("usbamp".parse::<DeviceFamily>().is_err());
    }

    #[test]
    fn session_config_defaults() {
        let session: SessionConfig = serde_json::from_str("{}").unwrap();
        assert!(!session.is_recording());
        assert!(session.write_header);
        assert!(session.sensor_map.is_empty());
    }
}
