//! DeviceFacade: one controller as seen by the host framework.
//!
//! The facade owns everything that belongs to one device instance:
//!
//! ```text
//!            handle_command(channel, cmd)
//!  host ───────────────────────────────► DeviceFacade ──► CommandBroker ──► ConnectionSet
//!   ▲                                        │                                   │
//!   │  update_state / update_status          │ HealthMonitor                     │ FramedReader
//!   └────────────────────────────────────────┴──── feedback pump ◄───────────────┘
//! ```
//!
//! # Channel commands
//!
//! | Channel type | Command        | Device I/O                                    |
//! |--------------|----------------|-----------------------------------------------|
//! | `cc`         | `ON` / `OFF`   | `setstate`, channel updated from the reply    |
//! | `cc`         | `REFRESH`      | `getstate`, channel updated from the reply    |
//! | `ir`         | any text       | MAP lookup, hex → native, `sendir`            |
//! | `sl`         | any text       | MAP lookup, payload written to the serial port|
//! | `sl-direct`  | any text       | the text itself written to the serial port    |
//!
//! Commands are ignored while the device is not ONLINE; the broker reconnects
//! on its own and the host re-sends when the status comes back.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gc_core::protocol::{encode_latin1, CommandReply, DeviceCommand, ReplyError};
use gc_core::{
    convert_hex_to_native, is_hex_code, ChannelType, Delimiter, DeviceCapabilities,
    IrCodeError, IrTransactionCounter, TargetPort,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command_broker::{BrokerConfig, CommandBroker};
use super::health_check::{HealthCheckConfig, HealthMonitor};
use super::host::{ChannelState, DeviceHost, DeviceStatus, HostCommand, StatusDetail};
use super::request::BrokerError;
use super::status::StatusReporter;
use crate::infrastructure::network::{ConnectionSet, ConnectionSetConfig, PortMap, SerialFrame};
use crate::infrastructure::storage::code_map::{CodeMap, CodeMapError};
use crate::infrastructure::storage::config::{AppConfig, ChannelConfig, ConfigError};

/// Errors returned to the host by [`DeviceFacade`].
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("device is not initialized")]
    NotInitialized,

    #[error("device is already initialized")]
    AlreadyInitialized,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown channel {0:?}")]
    UnknownChannel(String),

    #[error("channel {channel:?} does not accept command {command:?}")]
    UnsupportedCommand { channel: String, command: String },

    #[error("channel {channel:?} uses serial module {module}, which this device does not have")]
    PortNotSupported { channel: String, module: u8 },

    #[error(transparent)]
    CodeMap(#[from] CodeMapError),

    #[error("invalid IR code: {0}")]
    IrCode(#[from] IrCodeError),

    #[error(transparent)]
    Reply(#[from] ReplyError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("device error: {0}")]
    Device(String),
}

/// Components that exist only between `initialize` and `dispose`.
struct Running {
    broker: Arc<CommandBroker>,
    monitor: HealthMonitor,
    pump: JoinHandle<()>,
}

/// One controller instance bound to a host.
pub struct DeviceFacade {
    config: AppConfig,
    host: Arc<dyn DeviceHost>,
    status: Arc<StatusReporter>,
    channels: HashMap<String, ChannelConfig>,
    capabilities: DeviceCapabilities,
    code_map: CodeMap,
    ir_ids: IrTransactionCounter,
    running: Mutex<Option<Running>>,
}

impl DeviceFacade {
    pub fn new(config: AppConfig, host: Arc<dyn DeviceHost>) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|channel| (channel.id.clone(), channel.clone()))
            .collect();
        let capabilities =
            DeviceCapabilities::for_device(config.device.device_type, config.device.active_cable);
        let code_map = CodeMap::new(config.device.map_file.clone());
        Self {
            status: Arc::new(StatusReporter::new(Arc::clone(&host))),
            config,
            host,
            channels,
            capabilities,
            code_map,
            ir_ids: IrTransactionCounter::new(),
            running: Mutex::new(None),
        }
    }

    /// Validates the configuration and starts the broker, the health monitor
    /// and the feedback pump.
    ///
    /// # Errors
    ///
    /// A configuration problem is reported to the host as
    /// OFFLINE / configuration error and returned; nothing is started.
    pub async fn initialize(&self) -> Result<(), FacadeError> {
        if self.lock_running().is_some() {
            return Err(FacadeError::AlreadyInitialized);
        }

        let connection_config = match build_connection_config(&self.config) {
            Ok(config) => config,
            Err(e) => {
                error!("{}: {e}", self.config.device.name);
                self.status
                    .mark_offline_with_error(StatusDetail::ConfigurationError, &e.to_string());
                return Err(e.into());
            }
        };

        info!(
            "initializing {} ({}) at {}",
            self.config.device.name, self.config.device.device_type, connection_config.host
        );
        let (connections, feedback) =
            ConnectionSet::new(connection_config, Arc::clone(&self.status));
        let connections = Arc::new(connections);
        let broker = Arc::new(CommandBroker::new(
            BrokerConfig::from(&self.config.broker),
            Arc::clone(&connections),
            Arc::clone(&self.status),
        ));
        broker.start()?;

        let monitor = HealthMonitor::spawn(
            Arc::clone(&broker),
            connections,
            Arc::clone(&self.status),
            HealthCheckConfig::from(&self.config.health_check),
        );
        let pump = tokio::spawn(pump_feedback(feedback, Arc::clone(&self.host)));

        *self.lock_running() = Some(Running {
            broker,
            monitor,
            pump,
        });
        Ok(())
    }

    /// Stops the health monitor, drains and stops the broker, and stops the
    /// feedback pump.  Does nothing if not initialized.
    pub async fn dispose(&self) {
        let Some(mut running) = self.lock_running().take() else {
            return;
        };
        info!("disposing {}", self.config.device.name);
        running.monitor.stop();
        running.broker.terminate();
        running.broker.join().await;
        running.pump.abort();
    }

    /// The status last reported to the host.
    pub fn status(&self) -> DeviceStatus {
        self.status.current()
    }

    /// Executes a host command on one channel.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the channel is unknown, the command
    /// cannot be mapped, or the device rejects it.  Commands arriving while
    /// the device is not ONLINE are dropped and return `Ok`.
    pub async fn handle_command(
        &self,
        channel_id: &str,
        command: HostCommand,
    ) -> Result<(), FacadeError> {
        let broker = self.broker()?;
        if !self.status.is_online() {
            debug!("ignoring {command} for {channel_id}: device is {}", self.status.current());
            return Ok(());
        }
        let Some(channel) = self.channels.get(channel_id) else {
            warn!("command {command} for unknown channel {channel_id}");
            return Err(FacadeError::UnknownChannel(channel_id.to_string()));
        };

        debug!("{channel_id} ({:?}) ← {command}", channel.channel_type);
        match (channel.channel_type, command) {
            (ChannelType::ContactClosure, HostCommand::On) => {
                self.set_contact(&broker, channel, true).await
            }
            (ChannelType::ContactClosure, HostCommand::Off) => {
                self.set_contact(&broker, channel, false).await
            }
            (ChannelType::ContactClosure, HostCommand::Refresh) => {
                self.refresh_contact(&broker, channel).await
            }
            (ChannelType::ContactClosure, HostCommand::Text(text)) => {
                Err(FacadeError::UnsupportedCommand {
                    channel: channel.id.clone(),
                    command: text,
                })
            }
            (_, HostCommand::Refresh) => {
                debug!("{channel_id} has no state to refresh");
                Ok(())
            }
            (ChannelType::Infrared, command) => {
                self.send_ir(&broker, channel, command.as_str()).await
            }
            (ChannelType::Serial, command) => {
                let payload = self.code_map.lookup(command.as_str()).await?;
                self.send_serial(&broker, channel, command.as_str(), &payload)
                    .await
            }
            (ChannelType::SerialDirect, command) => {
                self.send_serial(&broker, channel, "serial-direct", command.as_str())
                    .await
            }
        }
    }

    /// Re-reads the state of one channel from the device.
    pub async fn refresh(&self, channel_id: &str) -> Result<(), FacadeError> {
        self.handle_command(channel_id, HostCommand::Refresh).await
    }

    async fn set_contact(
        &self,
        broker: &CommandBroker,
        channel: &ChannelConfig,
        on: bool,
    ) -> Result<(), FacadeError> {
        let command = DeviceCommand::SetState {
            module: channel.module,
            connector: channel.connector,
            on,
        };
        let reply = run_command(broker, &command).await?;
        self.publish_state(channel, &reply);
        Ok(())
    }

    async fn refresh_contact(
        &self,
        broker: &CommandBroker,
        channel: &ChannelConfig,
    ) -> Result<(), FacadeError> {
        let command = DeviceCommand::GetState {
            module: channel.module,
            connector: channel.connector,
        };
        let reply = run_command(broker, &command).await?;
        self.publish_state(channel, &reply);
        Ok(())
    }

    fn publish_state(&self, channel: &ChannelConfig, reply: &CommandReply) {
        if let CommandReply::State { on, .. } = reply {
            let state = if *on { ChannelState::On } else { ChannelState::Off };
            self.host.update_state(&channel.id, state);
        }
    }

    async fn send_ir(
        &self,
        broker: &CommandBroker,
        channel: &ChannelConfig,
        key: &str,
    ) -> Result<(), FacadeError> {
        let mut code = self.code_map.lookup(key).await?;
        if is_hex_code(&code) {
            code = convert_hex_to_native(&code)?;
        }
        let command = DeviceCommand::SendIr {
            module: channel.module,
            connector: channel.connector,
            id: self.ir_ids.next(),
            code,
        };
        run_command(broker, &command).await?;
        Ok(())
    }

    async fn send_serial(
        &self,
        broker: &CommandBroker,
        channel: &ChannelConfig,
        name: &str,
        encoded: &str,
    ) -> Result<(), FacadeError> {
        let port = TargetPort::serial_for_module(channel.module)
            .filter(|port| self.capabilities.supports(*port))
            .ok_or_else(|| FacadeError::PortNotSupported {
                channel: channel.id.clone(),
                module: channel.module,
            })?;

        let response = broker.send_serial(name, port, encoded).await;
        if response.is_error {
            return Err(FacadeError::Device(response.text));
        }
        Ok(())
    }

    fn broker(&self) -> Result<Arc<CommandBroker>, FacadeError> {
        self.lock_running()
            .as_ref()
            .map(|running| Arc::clone(&running.broker))
            .ok_or(FacadeError::NotInitialized)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sends `command` and parses the reply.
async fn run_command(
    broker: &CommandBroker,
    command: &DeviceCommand,
) -> Result<CommandReply, FacadeError> {
    let response = broker.send_command(command).await;
    if response.is_error {
        return Err(FacadeError::Device(response.text));
    }
    Ok(command.parse_reply(&response.text)?)
}

/// Forwards framed serial input to the port's feedback channel, URL-encoded.
async fn pump_feedback(mut feedback: mpsc::Receiver<SerialFrame>, host: Arc<dyn DeviceHost>) {
    while let Some(frame) = feedback.recv().await {
        let Some(channel_id) = frame.port.feedback_channel_id() else {
            continue;
        };
        let text = encode_latin1(&frame.bytes);
        debug!("{channel_id} → {text}");
        host.update_state(channel_id, ChannelState::Text(text));
    }
    debug!("feedback channel closed");
}

/// Validates `config` and derives the connection settings from it.
///
/// # Errors
///
/// Returns the first [`ConfigError`] found: missing host, unparsable bind
/// address, a two-way serial port without a valid delimiter, or a channel
/// id used twice.
pub fn build_connection_config(config: &AppConfig) -> Result<ConnectionSetConfig, ConfigError> {
    let device = &config.device;
    let host = device.host.trim();
    if host.is_empty() {
        return Err(ConfigError::MissingHost);
    }

    let bind_address = match device.bind_address.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(value.parse::<IpAddr>().map_err(|source| {
            ConfigError::InvalidBindAddress {
                value: value.to_string(),
                source,
            }
        })?),
    };

    let capabilities = DeviceCapabilities::for_device(device.device_type, device.active_cable);
    let mut delimiters = HashMap::new();
    for port in capabilities.serial_ports() {
        if !config.serial.two_way_enabled(port) {
            continue;
        }
        let text = config
            .serial
            .delimiter(port)
            .filter(|text| !text.is_empty())
            .ok_or(ConfigError::MissingDelimiter { port })?;
        let delimiter = Delimiter::from_url_encoded(text)
            .map_err(|source| ConfigError::InvalidDelimiter { port, source })?;
        delimiters.insert(port, delimiter);
    }

    let mut seen = HashSet::new();
    for channel in &config.channels {
        if !seen.insert(channel.id.as_str()) {
            return Err(ConfigError::DuplicateChannel(channel.id.clone()));
        }
    }

    Ok(ConnectionSetConfig {
        host: host.to_string(),
        bind_address,
        ports: PortMap {
            command: device.command_port,
            serial1: device.serial1_port,
            serial2: device.serial2_port,
        },
        connect_timeout: Duration::from_millis(config.broker.connect_timeout_ms),
        capabilities,
        serial1_delimiter: delimiters.remove(&TargetPort::Serial1),
        serial2_delimiter: delimiters.remove(&TargetPort::Serial2),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
