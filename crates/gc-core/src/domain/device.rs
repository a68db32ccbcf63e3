//! Device types, capabilities and port addressing.
//!
//! Every controller has one command port.  Whether it also has serial
//! passthrough ports depends on the model (and, for the iTach Flex, on which
//! cable is plugged in).  [`DeviceCapabilities`] is derived once from the
//! device type at construction and never changes afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

/// TCP port of the controller's command connection.
pub const COMMAND_PORT: u16 = 4998;
/// TCP port of the first serial-passthrough connection.
pub const SERIAL1_PORT: u16 = 4999;
/// TCP port of the second serial-passthrough connection (GC-100-12 only).
pub const SERIAL2_PORT: u16 = 5000;

/// Supported controller models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "itach-ir")]
    ItachIr,
    #[serde(rename = "itach-cc")]
    ItachCc,
    #[serde(rename = "itach-sl")]
    ItachSl,
    #[serde(rename = "itach-flex")]
    ItachFlex,
    #[serde(rename = "gc-100-06")]
    Gc100_06,
    #[serde(rename = "gc-100-12")]
    Gc100_12,
    #[serde(rename = "zmote")]
    Zmote,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::ItachIr => "itach-ir",
            DeviceType::ItachCc => "itach-cc",
            DeviceType::ItachSl => "itach-sl",
            DeviceType::ItachFlex => "itach-flex",
            DeviceType::Gc100_06 => "gc-100-06",
            DeviceType::Gc100_12 => "gc-100-12",
            DeviceType::Zmote => "zmote",
        };
        f.write_str(name)
    }
}

/// The cable currently attached to an iTach Flex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveCable {
    #[default]
    Infrared,
    Serial,
    Relay,
}

/// Which serial-passthrough ports a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    pub supports_serial1: bool,
    pub supports_serial2: bool,
}

impl DeviceCapabilities {
    /// Derives the capabilities of `device_type`.
    ///
    /// `active_cable` is only consulted for the iTach Flex, which exposes a
    /// serial port only while the serial cable is attached.
    pub fn for_device(device_type: DeviceType, active_cable: ActiveCable) -> Self {
        let supports_serial1 = match device_type {
            DeviceType::ItachSl | DeviceType::Gc100_06 | DeviceType::Gc100_12 => true,
            DeviceType::ItachFlex => active_cable == ActiveCable::Serial,
            DeviceType::ItachIr | DeviceType::ItachCc | DeviceType::Zmote => false,
        };
        Self {
            supports_serial1,
            supports_serial2: device_type == DeviceType::Gc100_12,
        }
    }

    /// Returns `true` if `port` can be used on this device.
    ///
    /// The command port is always available.
    pub fn supports(&self, port: TargetPort) -> bool {
        match port {
            TargetPort::Command => true,
            TargetPort::Serial1 => self.supports_serial1,
            TargetPort::Serial2 => self.supports_serial2,
        }
    }

    /// Serial ports supported by this device, in connection order.
    pub fn serial_ports(&self) -> Vec<TargetPort> {
        let mut ports = Vec::with_capacity(2);
        if self.supports_serial1 {
            ports.push(TargetPort::Serial1);
        }
        if self.supports_serial2 {
            ports.push(TargetPort::Serial2);
        }
        ports
    }
}

/// Whether a request is a command/reply transaction or a one-way serial write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Command,
    Serial,
}

/// The physical connection a request is executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetPort {
    Command,
    Serial1,
    Serial2,
}

impl TargetPort {
    /// TCP port number on the controller.
    pub fn port_number(self) -> u16 {
        match self {
            TargetPort::Command => COMMAND_PORT,
            TargetPort::Serial1 => SERIAL1_PORT,
            TargetPort::Serial2 => SERIAL2_PORT,
        }
    }

    /// Short name used in log messages.
    pub fn name(self) -> &'static str {
        match self {
            TargetPort::Command => "command",
            TargetPort::Serial1 => "serial-1",
            TargetPort::Serial2 => "serial-2",
        }
    }

    /// Maps a serial module number from the channel configuration to a port.
    ///
    /// Module 1 is the first serial port and module 2 the second; anything
    /// else has no serial port.
    pub fn serial_for_module(module: u8) -> Option<TargetPort> {
        match module {
            1 => Some(TargetPort::Serial1),
            2 => Some(TargetPort::Serial2),
            _ => None,
        }
    }

    /// Host channel that receives framed inbound messages from this port.
    pub fn feedback_channel_id(self) -> Option<&'static str> {
        match self {
            TargetPort::Command => None,
            TargetPort::Serial1 => Some("sl-m1#receive"),
            TargetPort::Serial2 => Some("sl-m2#receive"),
        }
    }
}

impl fmt::Display for TargetPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a host channel, which decides how its commands are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// Relay contact closure (`setstate` / `getstate`).
    #[serde(rename = "cc")]
    ContactClosure,
    /// Infrared emitter (`sendir`), codes looked up in the MAP file.
    #[serde(rename = "ir")]
    Infrared,
    /// Serial port, payloads looked up in the MAP file.
    #[serde(rename = "sl")]
    Serial,
    /// Serial port, the command text itself is the payload.
    #[serde(rename = "sl-direct")]
    SerialDirect,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
