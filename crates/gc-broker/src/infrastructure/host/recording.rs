//! A host that remembers everything it was told.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::application::host::{ChannelState, DeviceHost, DeviceStatus};

/// Records channel updates and status changes in arrival order.
#[derive(Debug, Default)]
pub struct RecordingHost {
    states: Mutex<Vec<(String, ChannelState)>>,
    statuses: Mutex<Vec<DeviceStatus>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(channel_id, state)` update so far.
    pub fn states(&self) -> Vec<(String, ChannelState)> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The updates received for one channel.
    pub fn states_for(&self, channel_id: &str) -> Vec<ChannelState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| id == channel_id)
            .map(|(_, state)| state.clone())
            .collect()
    }

    /// Every status reported so far.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_status(&self) -> Option<DeviceStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Polls until `condition` holds or `limit` elapses.
    ///
    /// Returns whether the condition was met.
    pub async fn wait_until<F>(&self, limit: Duration, mut condition: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if condition(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl DeviceHost for RecordingHost {
    fn update_state(&self, channel_id: &str, state: ChannelState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel_id.to_string(), state));
    }

    fn update_status(&self, status: DeviceStatus) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(status);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::host::StatusDetail;

    #[test]
    fn test_records_states_per_channel() {
        let host = RecordingHost::new();

        host.update_state("relay-1", ChannelState::On);
        host.update_state("sl-m1#receive", ChannelState::Text("OK%0D".into()));
        host.update_state("relay-1", ChannelState::Off);

        assert_eq!(host.states().len(), 3);
        assert_eq!(
            host.states_for("relay-1"),
            vec![ChannelState::On, ChannelState::Off]
        );
    }

    #[test]
    fn test_last_status() {
        let host = RecordingHost::new();
        assert_eq!(host.last_status(), None);

        host.update_status(DeviceStatus::Online);
        host.update_status(DeviceStatus::offline_with_error(
            StatusDetail::CommunicationError,
            "reply is null",
        ));

        assert_eq!(host.statuses().len(), 2);
        assert_eq!(
            host.last_status().and_then(|s| s.detail()),
            Some(StatusDetail::CommunicationError)
        );
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let host = RecordingHost::new();
        let met = host
            .wait_until(Duration::from_millis(30), |h| !h.statuses().is_empty())
            .await;
        assert!(!met);
    }
}
