//! Streaming control for biosignal devices
//!
//! A [`DeviceManager`] pairs one device client with a [`StreamController`].
//! The controller owns at most one background worker that reads frames from
//! the device's data socket and hands them to consumers over a `flume`
//! queue, optionally recording them to disk on the way.

pub mod config;
pub mod controller;
pub mod error;
pub mod manager;
pub mod recorder;

pub use config::StreamConfig;
pub use controller::StreamController;
pub use error::{AcquisitionError, AcquisitionResult};
pub use manager::DeviceManager;
pub use recorder::Recorder;
