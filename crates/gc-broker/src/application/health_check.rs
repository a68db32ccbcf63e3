//! Periodic `getversion` probe.
//!
//! The controller never tells us when a connection silently dies, so a
//! monitor task sends `getversion` through the broker on a fixed schedule.
//! The probe is an ordinary request: it waits its turn in the queue like any
//! host command, so it never interleaves with another command on the wire.
//!
//! - Reply received → the device is ONLINE.
//! - Error reply, timeout, full queue or transport failure → OFFLINE with a
//!   communication error, and the connection set is closed.  The next
//!   request reconnects from scratch.

use std::sync::Arc;
use std::time::Duration;

use gc_core::protocol::DeviceCommand;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::command_broker::CommandBroker;
use super::host::StatusDetail;
use super::request::Request;
use super::status::StatusReporter;
use crate::infrastructure::network::ConnectionSet;
use crate::infrastructure::storage::config::HealthCheckSection;

/// Schedule of the health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Delay before the first probe.
    pub start_delay: Duration,
    /// Period between probes.
    pub interval: Duration,
    /// How long a probe waits for its reply.
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(15),
            interval: Duration::from_secs(60),
            timeout: Duration::from_millis(5000),
        }
    }
}

impl From<&HealthCheckSection> for HealthCheckConfig {
    fn from(section: &HealthCheckSection) -> Self {
        Self {
            start_delay: Duration::from_secs(section.start_delay_secs),
            // A zero period would make `interval_at` panic.
            interval: Duration::from_secs(section.interval_secs.max(1)),
            timeout: Duration::from_millis(section.timeout_ms),
        }
    }
}

/// Handle to the running monitor task.  Dropping it stops the monitor.
#[derive(Debug)]
pub struct HealthMonitor {
    task: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawns the monitor on the current tokio runtime.
    pub fn spawn(
        broker: Arc<CommandBroker>,
        connections: Arc<ConnectionSet>,
        status: Arc<StatusReporter>,
        config: HealthCheckConfig,
    ) -> Self {
        info!(
            "health check every {:?}, first in {:?}",
            config.interval, config.start_delay
        );
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + config.start_delay, config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                check_health(&broker, &connections, &status, config.timeout).await;
            }
        });
        Self { task: Some(task) }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancels the monitor.  Calling it again does nothing.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("stopping health check");
            task.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends one probe and applies its outcome.  Returns `true` if healthy.
pub async fn check_health(
    broker: &CommandBroker,
    connections: &ConnectionSet,
    status: &StatusReporter,
    timeout: Duration,
) -> bool {
    let probe = DeviceCommand::GetVersion;
    let (request, handle) = Request::command(probe.name(), probe.to_line());

    let failure = match broker.call(request, handle, timeout).await {
        Ok(response) if !response.is_error => {
            debug!("health check passed: {}", response.text);
            status.mark_online();
            return true;
        }
        Ok(response) => response.text,
        Err(e) => e.to_string(),
    };

    warn!("health check failed: {failure}");
    status.mark_offline_with_error(StatusDetail::CommunicationError, &failure);
    connections.disconnect().await;
    false
}

// ── Tests ─────────────────────────────────────────────────────────────────────
