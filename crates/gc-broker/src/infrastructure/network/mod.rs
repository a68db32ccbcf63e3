//! Network infrastructure: the sockets to the controller.
//!
//! # Sub-modules
//!
//! - **`connection_set`** – Opens, uses and tears down the command connection
//!   and the serial-passthrough connections as one unit.
//!
//! - **`serial_reader`** – One task per two-way serial connection that frames
//!   the inbound byte stream into messages and sends them on the feedback
//!   channel.

pub mod connection_set;
pub mod serial_reader;

pub use connection_set::{ConnectError, ConnectionSet, ConnectionSetConfig, LinkError, PortMap};
pub use serial_reader::{FramedReader, SerialFrame};
