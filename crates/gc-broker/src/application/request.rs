//! Requests, responses and the broker's error type.
//!
//! A [`Request`] is built by a caller together with a [`ResponseHandle`].
//! The request moves into the broker's queue; the handle stays with the
//! caller and resolves exactly once, when the worker has executed the
//! request.

use std::time::Duration;

use gc_core::protocol::is_error_reply;
use gc_core::{RequestKind, TargetPort};
use thiserror::Error;
use tokio::sync::oneshot;

/// Text of the response synthesized for a successful serial write.
pub const SERIAL_SUCCESS: &str = "successful";

/// Text of the response for a request that could not reach the device.
pub const NO_CONNECTION: &str = "No connection to device";

/// Errors returned by the broker's queueing interface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The bounded queue stayed full for the whole enqueue timeout.
    #[error("request queue is full")]
    QueueFull,

    /// The worker has terminated; nothing will execute the request.
    #[error("command broker is closed")]
    Closed,

    /// The worker is already running.
    #[error("command broker worker already started")]
    AlreadyStarted,

    /// No response arrived within the response timeout.
    #[error("timed out after {0:?} waiting for a response")]
    ResponseTimeout(Duration),

    /// The request was discarded without a response.
    #[error("request was dropped before a response was sent")]
    Dropped,
}

/// The outcome of one executed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub text: String,
    pub is_error: bool,
}

impl Response {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Wraps a reply line read from the command port.
    ///
    /// `ERR...` and `unknowncommand...` replies are flagged as errors.
    pub fn from_reply(reply: String) -> Self {
        let is_error = is_error_reply(&reply);
        Self {
            text: reply,
            is_error,
        }
    }
}

/// One unit of work for the broker.
#[derive(Debug)]
pub struct Request {
    /// Short label used in logs.
    pub name: String,
    /// Command line for [`RequestKind::Command`]; URL-encoded bytes for
    /// [`RequestKind::Serial`].
    pub payload: String,
    pub kind: RequestKind,
    pub target: TargetPort,
    completion: oneshot::Sender<Response>,
}

impl Request {
    pub fn new(
        name: impl Into<String>,
        payload: impl Into<String>,
        kind: RequestKind,
        target: TargetPort,
    ) -> (Self, ResponseHandle) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            name: name.into(),
            payload: payload.into(),
            kind,
            target,
            completion: tx,
        };
        (request, ResponseHandle { rx })
    }

    /// A command/reply transaction on the command port.
    pub fn command(name: impl Into<String>, line: impl Into<String>) -> (Self, ResponseHandle) {
        Self::new(name, line, RequestKind::Command, TargetPort::Command)
    }

    /// A one-way write of URL-encoded bytes to a serial port.
    pub fn serial(
        name: impl Into<String>,
        port: TargetPort,
        encoded_payload: impl Into<String>,
    ) -> (Self, ResponseHandle) {
        Self::new(name, encoded_payload, RequestKind::Serial, port)
    }

    /// Delivers the response, consuming the request.
    ///
    /// A caller that stopped waiting is not an error.
    pub fn complete(self, response: Response) {
        let _ = self.completion.send(response);
    }
}

/// The caller's side of a [`Request`].
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Response>,
}

impl ResponseHandle {
    /// Waits for the response without a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Dropped`] if the request was discarded.
    pub async fn wait(self) -> Result<Response, BrokerError> {
        self.rx.await.map_err(|_| BrokerError::Dropped)
    }

    /// Waits for the response for at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ResponseTimeout`] when the deadline passes and
    /// [`BrokerError::Dropped`] if the request was discarded.
    pub async fn wait_timeout(self, limit: Duration) -> Result<Response, BrokerError> {
        match tokio::time::timeout(limit, self.rx).await {
            Ok(result) => result.map_err(|_| BrokerError::Dropped),
            Err(_) => Err(BrokerError::ResponseTimeout(limit)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
