//! Device-status transition rules.
//!
//! Every component that notices a status change (connect, disconnect, a
//! failed command, a failed health probe, a bad configuration) reports it
//! here.  The reporter filters redundant transitions before calling the host:
//!
//! | Report                     | Forwarded when                                  |
//! |----------------------------|-------------------------------------------------|
//! | `mark_online`              | the device is not already ONLINE                |
//! | `mark_offline`             | the device is currently ONLINE                  |
//! | `mark_offline_with_error`  | the device is ONLINE, or OFFLINE without detail |
//!
//! The last rule means the first error wins: a communication error is not
//! overwritten by a later plain disconnect, nor by a second error.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use super::host::{DeviceHost, DeviceStatus, StatusDetail};

/// Tracks the current [`DeviceStatus`] and forwards transitions to the host.
pub struct StatusReporter {
    host: Arc<dyn DeviceHost>,
    current: Mutex<DeviceStatus>,
}

impl StatusReporter {
    /// Creates a reporter for a device that starts OFFLINE without detail.
    pub fn new(host: Arc<dyn DeviceHost>) -> Self {
        Self {
            host,
            current: Mutex::new(DeviceStatus::offline()),
        }
    }

    /// The most recently reported status.
    pub fn current(&self) -> DeviceStatus {
        self.lock().clone()
    }

    pub fn is_online(&self) -> bool {
        self.lock().is_online()
    }

    pub fn mark_online(&self) {
        let mut current = self.lock();
        if current.is_online() {
            return;
        }
        info!("device is ONLINE");
        *current = DeviceStatus::Online;
        self.host.update_status(DeviceStatus::Online);
    }

    pub fn mark_offline(&self) {
        let mut current = self.lock();
        if !current.is_online() {
            return;
        }
        info!("device is OFFLINE");
        *current = DeviceStatus::offline();
        self.host.update_status(DeviceStatus::offline());
    }

    pub fn mark_offline_with_error(&self, detail: StatusDetail, message: &str) {
        let mut current = self.lock();
        let forward = match current.detail() {
            None => true,
            Some(StatusDetail::None) => true,
            Some(_) => false,
        };
        if !forward {
            debug!("suppressing OFFLINE ({detail:?}) report: {message}");
            return;
        }
        warn!("device is OFFLINE ({detail:?}): {message}");
        let status = DeviceStatus::offline_with_error(detail, message);
        *current = status.clone();
        self.host.update_status(status);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceStatus> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
