//! TOML-based configuration for one controller.
//!
//! Example:
//!
//! ```toml
//! [device]
//! name = "living-room"
//! device_type = "gc-100-12"
//! host = "192.168.1.70"
//! bind_address = "192.168.1.10"
//! map_file = "/etc/gc-broker/codes.map"
//!
//! [serial]
//! enable_two_way_port_1 = true
//! end_of_message_delimiter_port_1 = "%0D"
//!
//! [health_check]
//! interval_secs = 60
//!
//! [[channels]]
//! id = "amp-power"
//! channel_type = "sl"
//! module = 1
//! connector = 1
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = "...")]` helper, and every section
//! may be omitted, so a file only needs the keys that differ from the
//! defaults.  The helpers double as the `Default` impls below.

use std::net::AddrParseError;
use std::path::{Path, PathBuf};

use gc_core::protocol::DelimiterError;
use gc_core::{ActiveCable, ChannelType, DeviceType, TargetPort};
use gc_core::{COMMAND_PORT, SERIAL1_PORT, SERIAL2_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("device host address is not set")]
    MissingHost,

    #[error("bind address {value:?} is not an IP address: {source}")]
    InvalidBindAddress {
        value: String,
        #[source]
        source: AddrParseError,
    },

    #[error("two-way mode is enabled on {port} but no end-of-message delimiter is set")]
    MissingDelimiter { port: TargetPort },

    #[error("end-of-message delimiter for {port} is invalid: {source}")]
    InvalidDelimiter {
        port: TargetPort,
        #[source]
        source: DelimiterError,
    },

    #[error("channel {0:?} is defined more than once")]
    DuplicateChannel(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub health_check: HealthCheckSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Which controller to talk to and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Label used in log messages.
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_device_type")]
    pub device_type: DeviceType,
    /// Host name or IP address of the controller.
    #[serde(default)]
    pub host: String,
    /// Local interface address the sockets bind to.  Unset lets the OS choose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    /// Cable attached to an iTach Flex; ignored for other models.
    #[serde(default)]
    pub active_cable: ActiveCable,
    /// MAP file with IR codes and serial payloads keyed by command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_file: Option<PathBuf>,
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    #[serde(default = "default_serial1_port")]
    pub serial1_port: u16,
    #[serde(default = "default_serial2_port")]
    pub serial2_port: u16,
}

/// Serial-passthrough feedback settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SerialSection {
    #[serde(default)]
    pub enable_two_way_port_1: bool,
    #[serde(default)]
    pub enable_two_way_port_2: bool,
    /// URL-encoded ISO-8859-1, e.g. `%0D%0A`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_message_delimiter_port_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_message_delimiter_port_2: Option<String>,
}

impl SerialSection {
    /// Whether two-way mode is enabled on `port`.
    pub fn two_way_enabled(&self, port: TargetPort) -> bool {
        match port {
            TargetPort::Command => false,
            TargetPort::Serial1 => self.enable_two_way_port_1,
            TargetPort::Serial2 => self.enable_two_way_port_2,
        }
    }

    /// The configured delimiter text for `port`, if any.
    pub fn delimiter(&self, port: TargetPort) -> Option<&str> {
        match port {
            TargetPort::Command => None,
            TargetPort::Serial1 => self.end_of_message_delimiter_port_1.as_deref(),
            TargetPort::Serial2 => self.end_of_message_delimiter_port_2.as_deref(),
        }
    }
}

/// Request queue and connection timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default)]
    pub enqueue_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Periodic `getversion` probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckSection {
    #[serde(default = "default_start_delay_secs")]
    pub start_delay_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// One host channel bound to a module and connector on the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub id: String,
    pub channel_type: ChannelType,
    #[serde(default = "default_address")]
    pub module: u8,
    #[serde(default = "default_address")]
    pub connector: u8,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_name() -> String {
    "globalcache".to_string()
}
fn default_device_type() -> DeviceType {
    DeviceType::ItachIr
}
fn default_command_port() -> u16 {
    COMMAND_PORT
}
fn default_serial1_port() -> u16 {
    SERIAL1_PORT
}
fn default_serial2_port() -> u16 {
    SERIAL2_PORT
}
fn default_queue_depth() -> usize {
    10
}
fn default_poll_timeout_ms() -> u64 {
    2000
}
fn default_response_timeout_ms() -> u64 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    1500
}
fn default_start_delay_secs() -> u64 {
    15
}
fn default_interval_secs() -> u64 {
    60
}
fn default_probe_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_address() -> u8 {
    1
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            device_type: default_device_type(),
            host: String::new(),
            bind_address: None,
            active_cable: ActiveCable::default(),
            map_file: None,
            command_port: default_command_port(),
            serial1_port: default_serial1_port(),
            serial2_port: default_serial2_port(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            poll_timeout_ms: default_poll_timeout_ms(),
            enqueue_timeout_ms: 0,
            response_timeout_ms: default_response_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        Self {
            start_delay_secs: default_start_delay_secs(),
            interval_secs: default_interval_secs(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("gc_broker_test_{}_{nanos}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_app_config_default_ports() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.device.command_port, 4998);
        assert_eq!(cfg.device.serial1_port, 4999);
        assert_eq!(cfg.device.serial2_port, 5000);
    }

    #[test]
    fn test_broker_section_defaults() {
        let cfg = BrokerSection::default();
        assert_eq!(cfg.queue_depth, 10);
        assert_eq!(cfg.poll_timeout_ms, 2000);
        assert_eq!(cfg.enqueue_timeout_ms, 0);
        assert_eq!(cfg.response_timeout_ms, 5000);
        assert_eq!(cfg.connect_timeout_ms, 1500);
    }

    #[test]
    fn test_health_check_section_defaults() {
        let cfg = HealthCheckSection::default();
        assert_eq!(cfg.start_delay_secs, 15);
        assert_eq!(cfg.interval_secs, 60);
        assert_eq!(cfg.timeout_ms, 5000);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.logging.log_level, "info");
        assert!(cfg.device.host.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        // Arrange
        let toml_str = r#"
[device]
name = "rack"
device_type = "gc-100-12"
host = "192.168.1.70"
bind_address = "192.168.1.10"
map_file = "/etc/gc/codes.map"

[serial]
enable_two_way_port_1 = true
end_of_message_delimiter_port_1 = "%0D%0A"

[broker]
queue_depth = 20

[[channels]]
id = "relay-1"
channel_type = "cc"
module = 3
connector = 1

[[channels]]
id = "tv"
channel_type = "ir"
connector = 2
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize full");

        // Assert
        assert_eq!(cfg.device.device_type, DeviceType::Gc100_12);
        assert_eq!(cfg.device.bind_address.as_deref(), Some("192.168.1.10"));
        assert!(cfg.serial.two_way_enabled(TargetPort::Serial1));
        assert!(!cfg.serial.two_way_enabled(TargetPort::Serial2));
        assert_eq!(cfg.serial.delimiter(TargetPort::Serial1), Some("%0D%0A"));
        assert_eq!(cfg.broker.queue_depth, 20);
        assert_eq!(cfg.broker.poll_timeout_ms, 2000);
        assert_eq!(cfg.channels.len(), 2);
        assert_eq!(cfg.channels[0].channel_type, ChannelType::ContactClosure);
        assert_eq!(cfg.channels[1].module, 1);
        assert_eq!(cfg.channels[1].connector, 2);
    }

    #[test]
    fn test_unknown_device_type_is_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[device]\ndevice_type = \"itach-xx\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_sl_direct_channel_type_parses() {
        let toml_str = "[[channels]]\nid = \"raw\"\nchannel_type = \"sl-direct\"\n";
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.channels[0].channel_type, ChannelType::SerialDirect);
    }

    #[test]
    fn test_unset_optional_fields_are_omitted() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).unwrap();
        assert!(!toml_str.contains("bind_address"));
        assert!(!toml_str.contains("map_file"));
        assert!(!toml_str.contains("end_of_message_delimiter"));
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = temp_path("missing.toml");
        assert_eq!(load_config(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let path = temp_path("bad.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_save_and_load_config() {
        // Arrange
        let path = temp_path("gc-broker.toml");
        let mut cfg = AppConfig::default();
        cfg.device.host = "10.0.0.5".to_string();
        cfg.device.device_type = DeviceType::ItachSl;
        cfg.serial.enable_two_way_port_1 = true;
        cfg.serial.end_of_message_delimiter_port_1 = Some("%0D".to_string());
        cfg.channels.push(ChannelConfig {
            id: "projector".to_string(),
            channel_type: ChannelType::Serial,
            module: 1,
            connector: 1,
        });

        // Act
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
