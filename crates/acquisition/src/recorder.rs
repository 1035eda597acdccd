//! Session recording: one CSV line per frame plus a JSON metadata sidecar.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use biosig_types::{Frame, SensorMeta, SessionConfig};
use log::{debug, info};

use crate::error::{AcquisitionError, AcquisitionResult};

/// Frame file inside the save directory
pub const FRAME_FILE: &str = "emg.csv";
/// Metadata sidecar inside the save directory
pub const META_FILE: &str = "meta.json";

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Writes the frames of one streaming session.
pub struct Recorder {
    dir: PathBuf,
    writer: csv::Writer<File>,
    sensor_map: BTreeMap<String, SensorMeta>,
    frames_written: u64,
    last_flush: Instant,
}

impl Recorder {
    /// Create the session files, or return `None` when the session has no
    /// save directory.
    ///
    /// The metadata sidecar is written immediately so a crash mid-session
    /// still leaves it on disk.
    pub fn open(session: &SessionConfig, labels: &[String]) -> AcquisitionResult<Option<Self>> {
        let dir = match &session.save_dir {
            Some(dir) => dir.clone(),
            None => return Ok(None),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            AcquisitionError::Recorder(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(FRAME_FILE);
        let file = File::create(&path).map_err(|e| {
            AcquisitionError::Recorder(format!("Failed to create {}: {}", path.display(), e))
        })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if session.write_header && !labels.is_empty() {
            writer.write_record(labels)?;
        }
        writer.flush()?;

        let recorder = Self {
            dir,
            writer,
            sensor_map: session.sensor_map.clone(),
            frames_written: 0,
            last_flush: Instant::now(),
        };
        recorder.save_meta()?;
        info!("Recording frames to {}", path.display());
        Ok(Some(recorder))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write_frame(&mut self, frame: &Frame) -> AcquisitionResult<()> {
        self.writer
            .write_record(frame.values().iter().map(|v| v.to_string()))?;
        self.frames_written += 1;

        if self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.writer.flush()?;
            self.last_flush = Instant::now();
        }
        Ok(())
    }

    /// Rewrite the metadata sidecar.
    pub fn save_meta(&self) -> AcquisitionResult<()> {
        save_meta(&self.dir.join(META_FILE), &self.sensor_map)
    }

    /// Flush the frame file and rewrite the sidecar. Returns the number of
    /// frames written.
    pub fn finish(mut self) -> AcquisitionResult<u64> {
        self.writer.flush()?;
        self.save_meta()?;
        info!(
            "Recorded {} frames to {}",
            self.frames_written,
            self.dir.display()
        );
        Ok(self.frames_written)
    }
}

/// Write sensor metadata as pretty-printed JSON keyed by serial.
pub fn save_meta(path: &Path, sensor_map: &BTreeMap<String, SensorMeta>) -> AcquisitionResult<()> {
    let json = serde_json::to_string_pretty(sensor_map)?;
    fs::write(path, json)?;
    debug!("Saved metadata for {} sensors to {}", sensor_map.len(), path.display());
    Ok(())
}

pub fn load_meta(path: &Path) -> AcquisitionResult<BTreeMap<String, SensorMeta>> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session(dir: &Path) -> SessionConfig {
        let mut session = SessionConfig::recording_to(dir);
        session.sensor_map.insert(
            "SP-W06-001".to_string(),
            SensorMeta {
                muscle_name: "Biceps".to_string(),
                side: "Left".to_string(),
            },
        );
        session
    }

    #[test]
    fn no_save_dir_means_no_recorder() {
        assert!(Recorder::open(&SessionConfig::default(), &[]).unwrap().is_none());
    }

    #[test]
    fn writes_header_frames_and_sidecar() {
        let dir = tempdir().unwrap();
        let labels = vec!["SP-W06-001".to_string(), "sensor2".to_string()];
        let mut recorder = Recorder::open(&session(dir.path()), &labels).unwrap().unwrap();

        // The sidecar exists before the first frame.
        assert!(dir.path().join(META_FILE).exists());

        recorder.write_frame(&Frame::new(0, vec![0.5, -1.25])).unwrap();
        recorder.write_frame(&Frame::new(1, vec![0.0, 2.0])).unwrap();
        assert_eq!(recorder.finish().unwrap(), 2);

        let csv = fs::read_to_string(dir.path().join(FRAME_FILE)).unwrap();
        assert_eq!(csv, "SP-W06-001,sensor2\n0.5,-1.25\n0,2\n");

        let meta = load_meta(&dir.path().join(META_FILE)).unwrap();
        assert_eq!(meta["SP-W06-001"].muscle_name, "Biceps");
        let raw = fs::read_to_string(dir.path().join(META_FILE)).unwrap();
        assert!(raw.contains("\n  \"SP-W06-001\""));
    }

    #[test]
    fn header_can_be_disabled() {
        let dir = tempdir().unwrap();
        let mut session = session(dir.path());
        session.write_header = false;
        let mut recorder = Recorder::open(&session, &["a".to_string()]).unwrap().unwrap();
        recorder.write_frame(&Frame::new(0, vec![3.0])).unwrap();
        recorder.finish().unwrap();

        let csv = fs::read_to_string(dir.path().join(FRAME_FILE)).unwrap();
        assert_eq!(csv, "3\n");
    }

    #[test]
    fn creates_missing_save_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("subject01").join("trial03");
        let recorder = Recorder::open(&SessionConfig::recording_to(&nested), &[])
            .unwrap()
            .unwrap();
        assert_eq!(recorder.dir(), nested.as_path());
        recorder.finish().unwrap();
        assert_eq!(load_meta(&nested.join(META_FILE)).unwrap().len(), 0);
    }
}
