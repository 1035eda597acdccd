use std::fs;
use std::path::{Path, PathBuf};

use acquisition::StreamConfig;
use anyhow::Context;
use biosig_types::{DeviceFamily, SessionConfig};
use devices::ConnectionConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the daemon
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Device family to drive
    #[serde(default = "default_device")]
    pub device: DeviceFamily,
    /// Host, ports and socket deadlines
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Delivery queue and worker settings
    #[serde(default)]
    pub stream: StreamConfig,
    /// Recording target and sensor placement
    #[serde(default)]
    pub session: SessionConfig,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[serde(default)]
    pub run_seconds: Option<u64>,
}

fn default_device() -> DeviceFamily {
    DeviceFamily::Trigno
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            connection: ConnectionConfig::default(),
            stream: StreamConfig::default(),
            session: SessionConfig::default(),
            run_seconds: None,
        }
    }
}

impl DaemonConfig {
    /// Load the configuration file, falling back to defaults when it does
    /// not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Could not read configuration file {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Could not parse configuration file {}", path.display()))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Session with a timestamped save directory under `root`.
    pub fn record_under(&mut self, root: &Path) {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.session.save_dir = Some(root.join(format!("{}_{}", self.device, stamp)));
    }

    pub fn save_dir(&self) -> Option<&PathBuf> {
        self.session.save_dir.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DaemonConfig::parse("{}").unwrap();
        assert_eq!(config.device, DeviceFamily::Trigno);
        assert_eq!(config.connection, ConnectionConfig::default());
        assert_eq!(config.stream, StreamConfig::default());
        assert!(config.save_dir().is_none());
        assert!(config.run_seconds.is_none());
    }

    #[test]
    fn parses_full_document() {
        let yaml = r#"
device: qtm
connection:
  host: 192.168.1.20
  channel_count: 4
  discover_sensors: false
stream:
  queue_capacity: null
  worker_name: qtm-acquisition
session:
  save_dir: /data/subject01
  write_header: false
  sensor_map:
    SP-W06-001:
      muscle_name: Soleus
      side: Left
run_seconds: 30
"#;
        let config = DaemonConfig::parse(yaml).unwrap();
        assert_eq!(config.device, DeviceFamily::Qtm);
        assert_eq!(config.connection.host, "192.168.1.20");
        assert_eq!(config.connection.channel_count, Some(4));
        assert_eq!(config.connection.control_port, None);
        assert!(!config.connection.discover_sensors);
        assert_eq!(config.stream.queue_capacity, None);
        assert_eq!(config.stream.worker_name, "qtm-acquisition");
        assert_eq!(config.save_dir(), Some(&PathBuf::from("/data/subject01")));
        assert!(!config.session.write_header);
        assert_eq!(config.session.sensor_map["SP-W06-001"].muscle_name, "Soleus");
        assert_eq!(config.run_seconds, Some(30));
    }

    #[test]
    fn unknown_family_is_rejected() {
        assert!(DaemonConfig::parse("device: usbamp").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.device, DeviceFamily::Trigno);
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acq.yaml");
        fs::write(&path, "device: analog\nconnection:\n  data_port: 6000\n").unwrap();
        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.device, DeviceFamily::Analog);
        assert_eq!(config.connection.data_port, Some(6000));
    }

    #[test]
    fn record_under_names_dir_after_device() {
        let mut config = DaemonConfig::default();
        config.record_under(Path::new("/tmp/sessions"));
        let dir = config.save_dir().unwrap();
        assert!(dir.starts_with("/tmp/sessions"));
        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("trigno_"));
    }
}
