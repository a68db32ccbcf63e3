//! Infrastructure layer of the broker.
//!
//! Contains the adapters to the outside world: sockets to the controller,
//! files on disk, and the host implementations used by the binary and the
//! tests.

pub mod host;
pub mod network;
pub mod storage;
