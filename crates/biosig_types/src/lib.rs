//! Shared types for the biosignal acquisition workspace
//!
//! This crate contains the value types passed between device clients, the
//! streaming controller and downstream consumers: decoded frames, stream
//! state, lifecycle events and the session metadata supplied by the
//! configuration layer.

pub mod config;
pub mod data;
pub mod event;

// Re-export commonly used types
pub use config::*;
pub use data::*;
pub use event::*;
