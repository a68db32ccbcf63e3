//! Application layer of the broker.
//!
//! # Sub-modules
//!
//! - **`host`** – The port towards the host framework: the [`host::DeviceHost`]
//!   trait plus the channel-state, device-status and host-command types that
//!   cross it.
//!
//! - **`status`** – Applies the device-status transition rules before anything
//!   is reported to the host, so repeated ONLINE/OFFLINE reports collapse.
//!
//! - **`request`** – The request/response pair exchanged with the broker and
//!   the one-shot handle a caller awaits.
//!
//! - **`command_broker`** – The single worker that serializes all device I/O.
//!   Every command and every serial write goes through its bounded queue.
//!
//! - **`health_check`** – Periodic `getversion` probe that forces a reconnect
//!   when the device stops answering.
//!
//! - **`device_facade`** – Ties everything to the host: validates
//!   configuration, owns the broker, and turns channel commands into device
//!   requests and serial frames into channel updates.
//!
//! Unlike a pure domain layer, these use cases drive the network adapters in
//! `infrastructure` directly; the host framework is the only seam behind a
//! trait.

pub mod command_broker;
pub mod device_facade;
pub mod health_check;
pub mod host;
pub mod request;
pub mod status;
