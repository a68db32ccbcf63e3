//! Device model for the relay controllers.
//!
//! Pure types with no I/O: which device types exist, which serial ports each
//! of them exposes, and how a host channel maps onto a controller port.

pub mod device;
