//! CommandBroker: one worker task that performs all device I/O.
//!
//! # Why a single worker? (for beginners)
//!
//! The controller's command port answers exactly one line per command, so two
//! commands in flight at once would get each other's replies.  Instead of
//! every caller locking the socket, callers put a [`Request`] into a bounded
//! queue and a single worker executes them one at a time, first in first out.
//! Each caller waits on its own one-shot [`ResponseHandle`].
//!
//! ```text
//!  caller A ─┐                       ┌──────────────┐
//!  caller B ─┼─► queue (depth 10) ─► │    worker    │ ─► ConnectionSet ─► device
//!  health  ──┘                       └──────┬───────┘
//!                                           └─► one-shot reply per request
//! ```
//!
//! # Failure handling
//!
//! - A full queue is reported to the caller immediately (after the optional
//!   enqueue timeout) as [`BrokerError::QueueFull`].
//! - Before each request the worker calls `connect()`, which is a no-op when
//!   already connected.  A device that cannot be reached yields an error
//!   response without touching any socket.
//! - A transport failure yields an error response, marks the device OFFLINE
//!   with a communication error, and disconnects so the next request
//!   reconnects from scratch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use gc_core::protocol::{decode_latin1, DeviceCommand};
use gc_core::{RequestKind, TargetPort};
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::host::StatusDetail;
use super::request::{
    BrokerError, Request, Response, ResponseHandle, NO_CONNECTION, SERIAL_SUCCESS,
};
use super::status::StatusReporter;
use crate::infrastructure::network::{ConnectionSet, LinkError};
use crate::infrastructure::storage::config::BrokerSection;

/// Tuning of the request queue and the worker loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub queue_depth: usize,
    /// How long the worker waits for a message before re-checking the
    /// termination flag.
    pub poll_timeout: Duration,
    /// How long `submit` waits for queue space.  Zero fails immediately.
    pub enqueue_timeout: Duration,
    /// How long `execute` waits for the worker's response.
    pub response_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 10,
            poll_timeout: Duration::from_millis(2000),
            enqueue_timeout: Duration::ZERO,
            response_timeout: Duration::from_millis(5000),
        }
    }
}

impl From<&BrokerSection> for BrokerConfig {
    fn from(section: &BrokerSection) -> Self {
        Self {
            queue_depth: section.queue_depth.max(1),
            poll_timeout: Duration::from_millis(section.poll_timeout_ms),
            enqueue_timeout: Duration::from_millis(section.enqueue_timeout_ms),
            response_timeout: Duration::from_millis(section.response_timeout_ms),
        }
    }
}

enum Message {
    Execute(Request),
    Terminate,
}

/// Serializes all device I/O through one worker task.
pub struct CommandBroker {
    config: BrokerConfig,
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<ConnectionSet>,
    status: Arc<StatusReporter>,
    /// Cleared by `terminate`; new submissions are refused.
    accepting: AtomicBool,
    /// Set when the terminate sentinel could not be queued.
    terminated: Arc<AtomicBool>,
}

impl CommandBroker {
    /// Creates a broker with an empty queue.  The worker is not running yet.
    pub fn new(
        config: BrokerConfig,
        connections: Arc<ConnectionSet>,
        status: Arc<StatusReporter>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth);
        Self {
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            connections,
            status,
            accepting: AtomicBool::new(true),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Spawns the worker task.  The worker connects before its first poll.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<(), BrokerError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BrokerError::AlreadyStarted)?;

        let worker = tokio::spawn(run_worker(
            rx,
            Arc::clone(&self.connections),
            Arc::clone(&self.status),
            Arc::clone(&self.terminated),
            self.config.poll_timeout,
        ));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        Ok(())
    }

    /// Queues a request for the worker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::QueueFull`] if no slot frees up within the
    /// enqueue timeout and [`BrokerError::Closed`] after termination.  In
    /// both cases the request is dropped and its handle reports
    /// [`BrokerError::Dropped`].
    pub async fn submit(&self, request: Request) -> Result<(), BrokerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let name = request.name.clone();
        let message = Message::Execute(request);

        let result = if self.config.enqueue_timeout.is_zero() {
            self.tx.try_send(message).map_err(|e| match e {
                TrySendError::Full(_) => BrokerError::QueueFull,
                TrySendError::Closed(_) => BrokerError::Closed,
            })
        } else {
            self.tx
                .send_timeout(message, self.config.enqueue_timeout)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => BrokerError::QueueFull,
                    SendTimeoutError::Closed(_) => BrokerError::Closed,
                })
        };

        match &result {
            Ok(()) => debug!("queued request {name}"),
            Err(e) => warn!("could not queue request {name}: {e}"),
        }
        result
    }

    /// Submits `request` and waits up to `limit` for its response.
    ///
    /// # Errors
    ///
    /// Propagates [`submit`](Self::submit) errors and
    /// [`BrokerError::ResponseTimeout`] / [`BrokerError::Dropped`].
    pub async fn call(
        &self,
        request: Request,
        handle: ResponseHandle,
        limit: Duration,
    ) -> Result<Response, BrokerError> {
        self.submit(request).await?;
        handle.wait_timeout(limit).await
    }

    /// Builds, submits and awaits one request.
    ///
    /// Queueing failures and timeouts are folded into an error [`Response`].
    pub async fn execute(
        &self,
        name: &str,
        payload: &str,
        kind: RequestKind,
        target: TargetPort,
    ) -> Response {
        let (request, handle) = Request::new(name, payload, kind, target);
        match self.call(request, handle, self.config.response_timeout).await {
            Ok(response) => response,
            Err(e) => {
                warn!("request {name} failed: {e}");
                Response::error(format!("ERROR: {e}"))
            }
        }
    }

    /// Sends one command on the command port and returns the reply.
    pub async fn send_command(&self, command: &DeviceCommand) -> Response {
        self.execute(
            command.name(),
            &command.to_line(),
            RequestKind::Command,
            TargetPort::Command,
        )
        .await
    }

    /// Writes a URL-encoded payload to a serial port.
    pub async fn send_serial(&self, name: &str, port: TargetPort, encoded: &str) -> Response {
        self.execute(name, encoded, RequestKind::Serial, port).await
    }

    /// Asks the worker to stop after the requests already queued.
    ///
    /// If the stop message cannot be queued, the worker stops at its next
    /// poll timeout instead.
    pub fn terminate(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("terminating command broker");
        if let Err(e) = self.tx.try_send(Message::Terminate) {
            debug!("terminate message not queued ({e}); setting termination flag");
            self.terminated.store(true, Ordering::SeqCst);
        }
    }

    /// Waits for the worker task to finish.
    pub async fn join(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("command broker worker ended abnormally: {e}");
            }
        }
    }

    /// Returns `true` while the worker task is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Message>,
    connections: Arc<ConnectionSet>,
    status: Arc<StatusReporter>,
    terminated: Arc<AtomicBool>,
    poll_timeout: Duration,
) {
    info!("command broker worker started");
    connections.connect().await;

    while !terminated.load(Ordering::SeqCst) {
        let message = match tokio::time::timeout(poll_timeout, rx.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(message)) => message,
        };
        match message {
            Message::Terminate => {
                debug!("command broker received terminate");
                break;
            }
            Message::Execute(request) => {
                let response = execute_request(&connections, &status, &request).await;
                request.complete(response);
            }
        }
    }

    rx.close();
    connections.disconnect().await;
    info!("command broker worker stopped");
}

async fn execute_request(
    connections: &ConnectionSet,
    status: &StatusReporter,
    request: &Request,
) -> Response {
    let started = Instant::now();

    if !connections.connect().await {
        warn!("{}: {NO_CONNECTION}", request.name);
        return Response::error(NO_CONNECTION);
    }

    let result = match request.kind {
        RequestKind::Command => connections
            .transact(&request.payload)
            .await
            .map(Response::from_reply),
        RequestKind::Serial => match decode_latin1(&request.payload) {
            Ok(bytes) => connections
                .write_serial(request.target, &bytes)
                .await
                .map(|()| Response::ok(SERIAL_SUCCESS)),
            Err(e) => {
                warn!("{}: serial payload is not valid URL encoding: {e}", request.name);
                return Response::error(format!("ERROR: {e}"));
            }
        },
    };

    let response = match result {
        Ok(response) => response,
        Err(LinkError::NotConnected) => Response::error(NO_CONNECTION),
        Err(e) if e.is_transport() => {
            error!("{} on {} failed: {e}", request.name, request.target);
            status.mark_offline_with_error(StatusDetail::CommunicationError, &e.to_string());
            connections.disconnect().await;
            Response::error(format!("ERROR: {e}"))
        }
        Err(e) => {
            warn!("{} on {} rejected: {e}", request.name, request.target);
            Response::error(format!("ERROR: {e}"))
        }
    };

    debug!(
        "{} on {} took {:?}: {}",
        request.name,
        request.target,
        started.elapsed(),
        response.text
    );
    response
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::host::MockDeviceHost;
    use crate::infrastructure::network::{ConnectionSetConfig, PortMap};
    use gc_core::DeviceCapabilities;
    use tokio::net::TcpListener;

    fn status() -> Arc<StatusReporter> {
        let mut host = MockDeviceHost::new();
        host.expect_update_status().return_const(());
        Arc::new(StatusReporter::new(Arc::new(host)))
    }

    async fn unreachable_connections(status: Arc<StatusReporter>) -> Arc<ConnectionSet> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = ConnectionSetConfig {
            host: "127.0.0.1".to_string(),
            bind_address: None,
            ports: PortMap {
                command: port,
                ..PortMap::default()
            },
            connect_timeout: Duration::from_millis(200),
            capabilities: DeviceCapabilities::default(),
            serial1_delimiter: None,
            serial2_delimiter: None,
        };
        Arc::new(ConnectionSet::new(config, status).0)
    }

    fn fast_config() -> BrokerConfig {
        BrokerConfig {
            poll_timeout: Duration::from_millis(50),
            response_timeout: Duration::from_secs(2),
            ..BrokerConfig::default()
        }
    }

    #[test]
    fn test_broker_config_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.queue_depth, 10);
        assert_eq!(config.poll_timeout, Duration::from_millis(2000));
        assert_eq!(config.enqueue_timeout, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_eleventh_submit_fails_fast_when_queue_is_full() {
        // Arrange – the worker is never started, so nothing drains the queue
        let status = status();
        let broker = CommandBroker::new(
            BrokerConfig::default(),
            unreachable_connections(Arc::clone(&status)).await,
            status,
        );
        let mut handles = Vec::new();

        // Act
        for i in 0..10 {
            let (request, handle) = Request::command(format!("cmd{i}"), "getversion");
            broker.submit(request).await.unwrap();
            handles.push(handle);
        }
        let (eleventh, handle) = Request::command("cmd10", "getversion");
        let started = Instant::now();
        let result = broker.submit(eleventh).await;

        // Assert
        assert_eq!(result, Err(BrokerError::QueueFull));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(handle.wait().await, Err(BrokerError::Dropped));
    }

    #[tokio::test]
    async fn test_enqueue_timeout_waits_then_reports_full() {
        let status = status();
        let config = BrokerConfig {
            queue_depth: 1,
            enqueue_timeout: Duration::from_millis(50),
            ..BrokerConfig::default()
        };
        let broker = CommandBroker::new(
            config,
            unreachable_connections(Arc::clone(&status)).await,
            status,
        );

        let (first, _h1) = Request::command("first", "getversion");
        broker.submit(first).await.unwrap();
        let (second, _h2) = Request::command("second", "getversion");
        let started = Instant::now();

        assert_eq!(broker.submit(second).await, Err(BrokerError::QueueFull));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_unreachable_device_yields_no_connection_response() {
        // Arrange
        let status = status();
        let broker = CommandBroker::new(
            fast_config(),
            unreachable_connections(Arc::clone(&status)).await,
            Arc::clone(&status),
        );
        broker.start().unwrap();

        // Act
        let response = broker.send_command(&DeviceCommand::GetVersion).await;

        // Assert
        assert_eq!(response, Response::error(NO_CONNECTION));
        assert_eq!(status.current().detail(), Some(StatusDetail::CommunicationError));
        broker.terminate();
        broker.join().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let status = status();
        let broker = CommandBroker::new(
            fast_config(),
            unreachable_connections(Arc::clone(&status)).await,
            status,
        );

        broker.start().unwrap();
        assert_eq!(broker.start(), Err(BrokerError::AlreadyStarted));
        broker.terminate();
        broker.join().await;
    }

    #[tokio::test]
    async fn test_terminate_stops_worker_and_refuses_new_requests() {
        // Arrange
        let status = status();
        let broker = CommandBroker::new(
            fast_config(),
            unreachable_connections(Arc::clone(&status)).await,
            status,
        );
        broker.start().unwrap();

        // Act
        broker.terminate();
        tokio::time::timeout(Duration::from_secs(2), broker.join())
            .await
            .expect("worker must stop after terminate");
        let (late, _handle) = Request::command("late", "getversion");

        // Assert
        assert!(!broker.is_running());
        assert_eq!(broker.submit(late).await, Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn test_termination_flag_stops_worker_at_poll_timeout() {
        // Arrange – fill the queue so the terminate message cannot be queued
        let status = status();
        let config = BrokerConfig {
            queue_depth: 1,
            ..fast_config()
        };
        let broker = CommandBroker::new(
            config,
            unreachable_connections(Arc::clone(&status)).await,
            status,
        );
        let (filler, _handle) = Request::command("filler", "getversion");
        broker.submit(filler).await.unwrap();

        // Act
        broker.terminate();
        broker.start().unwrap();

        // Assert
        tokio::time::timeout(Duration::from_secs(2), broker.join())
            .await
            .expect("worker must notice the termination flag");
    }
}
