//! The port between the broker and the host framework.
//!
//! The host owns channels (one per relay, IR emitter or serial port) and shows
//! the device's status.  The broker only ever talks to it through
//! [`DeviceHost`], which keeps the broker testable without a real host: unit
//! tests use the generated `MockDeviceHost`, integration tests use
//! [`crate::infrastructure::host::RecordingHost`].

use std::fmt;

/// The value pushed to a host channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    On,
    Off,
    /// Free text, e.g. a URL-encoded serial message.
    Text(String),
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::On => f.write_str("ON"),
            ChannelState::Off => f.write_str("OFF"),
            ChannelState::Text(text) => f.write_str(text),
        }
    }
}

/// Why a device is offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDetail {
    None,
    CommunicationError,
    ConfigurationError,
}

/// Device status as shown by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline {
        detail: StatusDetail,
        message: Option<String>,
    },
}

impl DeviceStatus {
    /// The status of a device that has not connected yet.
    pub fn offline() -> Self {
        DeviceStatus::Offline {
            detail: StatusDetail::None,
            message: None,
        }
    }

    pub fn offline_with_error(detail: StatusDetail, message: impl Into<String>) -> Self {
        DeviceStatus::Offline {
            detail,
            message: Some(message.into()),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }

    /// The offline detail, or `None` while online.
    pub fn detail(&self) -> Option<StatusDetail> {
        match self {
            DeviceStatus::Online => None,
            DeviceStatus::Offline { detail, .. } => Some(*detail),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => f.write_str("ONLINE"),
            DeviceStatus::Offline {
                detail,
                message: None,
            } => write!(f, "OFFLINE ({detail:?})"),
            DeviceStatus::Offline {
                detail,
                message: Some(message),
            } => write!(f, "OFFLINE ({detail:?}): {message}"),
        }
    }
}

/// A command issued by the host to one channel.
///
/// For contact-closure channels only `On`, `Off` and `Refresh` are
/// meaningful.  For IR and serial channels the command text is the key
/// looked up in the MAP file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    On,
    Off,
    Refresh,
    Text(String),
}

impl HostCommand {
    /// Parses host command text; `ON`, `OFF` and `REFRESH` are keywords.
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "ON" => HostCommand::On,
            "OFF" => HostCommand::Off,
            "REFRESH" => HostCommand::Refresh,
            other => HostCommand::Text(other.to_string()),
        }
    }

    /// The command text, used as the MAP-file key.
    pub fn as_str(&self) -> &str {
        match self {
            HostCommand::On => "ON",
            HostCommand::Off => "OFF",
            HostCommand::Refresh => "REFRESH",
            HostCommand::Text(text) => text,
        }
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callbacks from the broker into the host framework.
///
/// Implementations must not call back into the broker from these methods;
/// they may be invoked while broker-internal locks are held.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceHost: Send + Sync {
    /// Publishes a new value for `channel_id`.
    fn update_state(&self, channel_id: &str, state: ChannelState);

    /// Publishes a new device status.
    fn update_status(&self, status: DeviceStatus);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_command_parses_keywords() {
        assert_eq!(HostCommand::parse("ON"), HostCommand::On);
        assert_eq!(HostCommand::parse("OFF"), HostCommand::Off);
        assert_eq!(HostCommand::parse(" REFRESH "), HostCommand::Refresh);
    }

    #[test]
    fn test_host_command_other_text_is_map_key() {
        let cmd = HostCommand::parse("POWER_TOGGLE");
        assert_eq!(cmd, HostCommand::Text("POWER_TOGGLE".to_string()));
        assert_eq!(cmd.as_str(), "POWER_TOGGLE");
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert_eq!(HostCommand::parse("on"), HostCommand::Text("on".to_string()));
    }

    #[test]
    fn test_device_status_detail() {
        assert_eq!(DeviceStatus::Online.detail(), None);
        assert_eq!(DeviceStatus::offline().detail(), Some(StatusDetail::None));
        assert_eq!(
            DeviceStatus::offline_with_error(StatusDetail::CommunicationError, "x").detail(),
            Some(StatusDetail::CommunicationError)
        );
    }

    #[test]
    fn test_device_status_display_includes_message() {
        let status = DeviceStatus::offline_with_error(StatusDetail::ConfigurationError, "no host");
        assert_eq!(status.to_string(), "OFFLINE (ConfigurationError): no host");
        assert_eq!(DeviceStatus::Online.to_string(), "ONLINE");
    }

    #[test]
    fn test_channel_state_display() {
        assert_eq!(ChannelState::On.to_string(), "ON");
        assert_eq!(ChannelState::Text("PWR%0D".to_string()).to_string(), "PWR%0D");
    }
}
