//! ConnectionSet: the TCP connections to one controller.
//!
//! A controller is reached through one command connection plus one
//! connection per serial-passthrough port the device type supports.  The set
//! is connected as a whole: either every required socket is open, or none is.
//!
//! # Locking (for beginners)
//!
//! All socket halves live behind a single `tokio::sync::Mutex`.  The command
//! broker's worker holds it for the whole write-then-read of one command, so
//! two commands can never interleave on the wire.  `is_connected()` reads a
//! separate `AtomicBool` and never waits for the lock.
//!
//! A command read may block for as long as the device stays silent.
//! [`ConnectionSet::disconnect`] therefore first bumps a `watch` channel
//! (the *closing signal*); a pending read observes it, gives up the lock, and
//! the disconnect proceeds.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gc_core::{
    Delimiter, DeviceCapabilities, TargetPort, COMMAND_PORT, SERIAL1_PORT, SERIAL2_PORT,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpSocket, TcpStream,
    },
    sync::{mpsc, watch, Mutex},
};
use tracing::{debug, error, info, warn};

use super::serial_reader::{FramedReader, SerialFrame};
use crate::application::host::StatusDetail;
use crate::application::status::StatusReporter;

/// Capacity of the feedback channel shared by all serial readers.
const FEEDBACK_CAPACITY: usize = 64;

/// Errors raised while opening a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("{host}:{port} resolved to no usable address")]
    NoAddress { host: String, port: u16 },

    #[error("could not bind local address {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by I/O on an established connection set.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected")]
    NotConnected,

    #[error("{0} is not available on this device")]
    PortUnavailable(TargetPort),

    #[error("reply is null")]
    ReplyIsNull,

    #[error("connection closed while waiting for a reply")]
    Aborted,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Returns `true` if the error means the connection itself is broken.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LinkError::ReplyIsNull | LinkError::Aborted | LinkError::Io(_)
        )
    }
}

/// TCP port numbers of the three endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMap {
    pub command: u16,
    pub serial1: u16,
    pub serial2: u16,
}

impl PortMap {
    pub fn port_for(&self, target: TargetPort) -> u16 {
        match target {
            TargetPort::Command => self.command,
            TargetPort::Serial1 => self.serial1,
            TargetPort::Serial2 => self.serial2,
        }
    }
}

impl Default for PortMap {
    fn default() -> Self {
        Self {
            command: COMMAND_PORT,
            serial1: SERIAL1_PORT,
            serial2: SERIAL2_PORT,
        }
    }
}

/// Everything needed to open the connections of one device.
#[derive(Debug, Clone)]
pub struct ConnectionSetConfig {
    pub host: String,
    /// Local interface to bind each socket to (port 0).
    pub bind_address: Option<IpAddr>,
    pub ports: PortMap,
    pub connect_timeout: Duration,
    pub capabilities: DeviceCapabilities,
    /// Delimiter for serial-1 if its two-way mode is enabled.
    pub serial1_delimiter: Option<Delimiter>,
    /// Delimiter for serial-2 if its two-way mode is enabled.
    pub serial2_delimiter: Option<Delimiter>,
}

impl ConnectionSetConfig {
    fn delimiter_for(&self, port: TargetPort) -> Option<&Delimiter> {
        match port {
            TargetPort::Command => None,
            TargetPort::Serial1 => self.serial1_delimiter.as_ref(),
            TargetPort::Serial2 => self.serial2_delimiter.as_ref(),
        }
    }
}

struct CommandLink {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

struct SerialLink {
    port: TargetPort,
    writer: OwnedWriteHalf,
    /// Present only when the port's two-way mode is enabled.
    reader: Option<FramedReader>,
}

#[derive(Default)]
struct Links {
    command: Option<CommandLink>,
    serial: Vec<SerialLink>,
}

impl Links {
    fn is_empty(&self) -> bool {
        self.command.is_none() && self.serial.is_empty()
    }
}

/// The command connection and serial connections to one device.
pub struct ConnectionSet {
    config: ConnectionSetConfig,
    links: Mutex<Links>,
    connected: AtomicBool,
    closing: watch::Sender<u64>,
    status: Arc<StatusReporter>,
    feedback: mpsc::Sender<SerialFrame>,
}

impl ConnectionSet {
    /// Creates a disconnected set and returns the receiver of serial feedback.
    pub fn new(
        config: ConnectionSetConfig,
        status: Arc<StatusReporter>,
    ) -> (Self, mpsc::Receiver<SerialFrame>) {
        let (feedback, rx) = mpsc::channel(FEEDBACK_CAPACITY);
        let (closing, _) = watch::channel(0);
        let set = Self {
            config,
            links: Mutex::new(Links::default()),
            connected: AtomicBool::new(false),
            closing,
            status,
            feedback,
        };
        (set, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectionSetConfig {
        &self.config
    }

    /// Opens every connection the device needs.
    ///
    /// Returns `true` if the set is connected afterwards.  Failures are
    /// logged and reported to the status reporter, never returned.
    pub async fn connect(&self) -> bool {
        let mut links = self.links.lock().await;
        if self.is_connected() {
            return true;
        }

        let command = match self.open(TargetPort::Command).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("could not open command connection: {e}");
                self.status
                    .mark_offline_with_error(StatusDetail::CommunicationError, &e.to_string());
                return false;
            }
        };

        let mut serial_streams = Vec::new();
        for port in self.config.capabilities.serial_ports() {
            match self.open(port).await {
                Ok(stream) => serial_streams.push((port, stream)),
                Err(e) => {
                    // Dropping the streams opened so far closes them.
                    error!("could not open {port} connection: {e}");
                    self.status
                        .mark_offline_with_error(StatusDetail::CommunicationError, &e.to_string());
                    return false;
                }
            }
        }

        let (reader, writer) = command.into_split();
        links.command = Some(CommandLink {
            reader: BufReader::new(reader),
            writer,
        });
        for (port, stream) in serial_streams {
            let (reader, writer) = stream.into_split();
            let reader = self.config.delimiter_for(port).map(|delimiter| {
                FramedReader::spawn(port, reader, delimiter.clone(), self.feedback.clone())
            });
            links.serial.push(SerialLink {
                port,
                writer,
                reader,
            });
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(
            "connected to {} ({} serial connection(s))",
            self.config.host,
            links.serial.len()
        );
        self.status.mark_online();
        true
    }

    /// Stops the serial readers and closes every connection.
    ///
    /// Safe to call at any time and any number of times.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closing.send_modify(|generation| *generation = generation.wrapping_add(1));

        let mut links = self.links.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        if !links.is_empty() {
            // Reverse order of opening: serial ports last-first, then command.
            while let Some(mut link) = links.serial.pop() {
                if let Some(reader) = link.reader.as_mut() {
                    reader.stop();
                }
                if let Err(e) = link.writer.shutdown().await {
                    debug!("error closing {} connection: {e}", link.port);
                }
            }
            if let Some(mut command) = links.command.take() {
                if let Err(e) = command.writer.shutdown().await {
                    debug!("error closing command connection: {e}");
                }
            }
            info!("disconnected from {}", self.config.host);
        }
        self.status.mark_offline();
    }

    /// Writes one command line and reads the single reply line.
    ///
    /// The line is sent with a carriage-return terminator; the reply is
    /// returned trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] without any I/O if the set is not
    /// connected, [`LinkError::ReplyIsNull`] if the device closed the
    /// connection, and [`LinkError::Aborted`] if a disconnect interrupted the
    /// write or the read.
    pub async fn transact(&self, line: &str) -> Result<String, LinkError> {
        let mut closing = self.closing.subscribe();
        let mut links = self.links.lock().await;
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let link = links.command.as_mut().ok_or(LinkError::NotConnected)?;

        debug!("sending command: {line}");
        let payload = format!("{line}\r");
        tokio::select! {
            written = write_all_flush(&mut link.writer, payload.as_bytes()) => written?,
            _ = closing.changed() => return Err(LinkError::Aborted),
        }

        let reply = tokio::select! {
            reply = read_reply_line(&mut link.reader) => reply?,
            _ = closing.changed() => return Err(LinkError::Aborted),
        };
        debug!("received reply: {reply}");
        Ok(reply)
    }

    /// Writes raw bytes to a serial-passthrough connection.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] or [`LinkError::PortUnavailable`]
    /// without any I/O, [`LinkError::Io`] if the write fails, or
    /// [`LinkError::Aborted`] if a disconnect interrupted it.
    pub async fn write_serial(&self, port: TargetPort, bytes: &[u8]) -> Result<(), LinkError> {
        let mut closing = self.closing.subscribe();
        let mut links = self.links.lock().await;
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let link = links
            .serial
            .iter_mut()
            .find(|link| link.port == port)
            .ok_or(LinkError::PortUnavailable(port))?;

        debug!("writing {} bytes to {port}", bytes.len());
        tokio::select! {
            written = write_all_flush(&mut link.writer, bytes) => Ok(written?),
            _ = closing.changed() => Err(LinkError::Aborted),
        }
    }

    async fn open(&self, target: TargetPort) -> Result<TcpStream, ConnectError> {
        let port = self.config.ports.port_for(target);
        let addr = self.resolve(port).await?;
        debug!("opening {target} connection to {addr}");

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|source| ConnectError::Connect { addr, source })?;

        if let Some(ip) = self.config.bind_address {
            let local = SocketAddr::new(ip, 0);
            socket
                .bind(local)
                .map_err(|source| ConnectError::Bind { addr: local, source })?;
        }

        let timeout = self.config.connect_timeout;
        let stream = match tokio::time::timeout(timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectError::Connect { addr, source }),
            Err(_) => return Err(ConnectError::Timeout { addr, timeout }),
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("could not disable Nagle on {target} connection: {e}");
        }
        Ok(stream)
    }

    /// Resolves the device host, preferring the bind address's family.
    async fn resolve(&self, port: u16) -> Result<SocketAddr, ConnectError> {
        let host = self.config.host.as_str();
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ConnectError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?;
        let wanted_v4 = self.config.bind_address.map(|ip| ip.is_ipv4());
        addrs
            .find(|addr| wanted_v4.map_or(true, |v4| addr.is_ipv4() == v4))
            .ok_or_else(|| ConnectError::NoAddress {
                host: host.to_string(),
                port,
            })
    }
}

async fn write_all_flush(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Reads one reply line terminated by CR and/or LF.
///
/// Leading line terminators left over from a previous reply are skipped.
/// End of stream before any character is [`LinkError::ReplyIsNull`].
pub async fn read_reply_line<R>(reader: &mut R) -> Result<String, LinkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if line.is_empty() {
                    return Err(LinkError::ReplyIsNull);
                }
                break;
            }
            let mut consumed = 0;
            let mut done = false;
            for &byte in available {
                consumed += 1;
                if byte == b'\r' || byte == b'\n' {
                    if !line.is_empty() {
                        done = true;
                        break;
                    }
                } else {
                    line.push(byte);
                }
            }
            (consumed, done)
        };
        reader.consume(consumed);
        if done {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
