//! Device clients for laboratory biosignal hardware
//!
//! Two wire protocols are modelled: a line-oriented command/response protocol
//! on a control socket ([`command`]) and a raw stream of fixed-size
//! little-endian float frames on a data socket ([`codec`]). Each device family
//! combines them behind the [`DeviceClient`] trait.

pub mod analog;
pub mod codec;
pub mod command;
pub mod connection;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod protocol;
pub mod qtm;
pub mod trigno;
pub mod types;

// Re-export the main types that users need
pub use codec::{FrameReader, FrameSource};
pub use command::{CommandChannel, CommandResponse, ResponseKind};
pub use connection::ConnectionConfig;
pub use error::{DeviceError, SocketRole};
pub use types::{create_client, AnyClient, Capabilities, ClientStatus, DeviceClient};
