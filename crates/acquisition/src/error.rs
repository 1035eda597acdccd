//! Error types for the acquisition layer

use biosig_types::ErrorKind;
use devices::DeviceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to spawn acquisition worker: {0}")]
    WorkerSpawn(String),

    #[error("Acquisition worker panicked")]
    WorkerPanicked,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl From<csv::Error> for AcquisitionError {
    fn from(err: csv::Error) -> Self {
        AcquisitionError::Recorder(err.to_string())
    }
}

impl AcquisitionError {
    /// Classification used in lifecycle events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::Device(e) => e.kind(),
            AcquisitionError::Recorder(_)
            | AcquisitionError::Io(_)
            | AcquisitionError::Serialization(_) => ErrorKind::Recorder,
            AcquisitionError::WorkerSpawn(_)
            | AcquisitionError::WorkerPanicked
            | AcquisitionError::LockPoisoned(_) => ErrorKind::Worker,
        }
    }
}

/// Result type for acquisition operations
pub type AcquisitionResult<T> = Result<T, AcquisitionError>;
