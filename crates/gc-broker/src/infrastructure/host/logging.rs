//! A host that only logs.

use tracing::info;

use crate::application::host::{ChannelState, DeviceHost, DeviceStatus};

/// Logs channel and status updates under the device's name.
#[derive(Debug, Clone)]
pub struct LoggingHost {
    device: String,
}

impl LoggingHost {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl DeviceHost for LoggingHost {
    fn update_state(&self, channel_id: &str, state: ChannelState) {
        info!(device = %self.device, channel = channel_id, "state {state}");
    }

    fn update_status(&self, status: DeviceStatus) {
        info!(device = %self.device, "status {status}");
    }
}
