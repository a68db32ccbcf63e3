//! # gc-core
//!
//! Shared library for the GC broker containing the controller's command
//! vocabulary, the hex-to-native infrared code translator, the serial framing
//! primitives and the device model.
//!
//! It has zero dependencies on sockets, async runtimes or the host framework.
//!
//! # Architecture overview (for beginners)
//!
//! A network IR/serial relay controller (an iTach or a GC-100) is a small box
//! on the LAN that exposes:
//!
//! - a **command port** (TCP 4998) that accepts one CR-terminated ASCII command
//!   at a time and answers with exactly one line, and
//! - up to two **serial-passthrough ports** (TCP 4999 and 5000) that carry raw
//!   bytes to and from an RS-232 device wired to the controller.
//!
//! This crate defines:
//!
//! - **`protocol`** – What travels on those ports: command lines and reply
//!   parsing, IR code conversion, URL codec for serial payloads, and the
//!   delimiter scanner that frames inbound serial bytes into messages.
//!
//! - **`domain`** – The device model: device types, which serial ports each
//!   type supports, channel types and target ports.

pub mod domain;
pub mod protocol;

pub use domain::device::{
    ActiveCable, ChannelType, DeviceCapabilities, DeviceType, RequestKind, TargetPort,
    COMMAND_PORT, SERIAL1_PORT, SERIAL2_PORT,
};
pub use protocol::framing::{Delimiter, FrameScanner};
pub use protocol::ir_code::{convert_hex_to_native, is_hex_code, IrCodeError};
pub use protocol::sequence::IrTransactionCounter;
