//! Implementations of [`crate::application::host::DeviceHost`].
//!
//! - **`logging`** – writes every update to the tracing log; used by the
//!   binary when no real host framework is attached.
//! - **`recording`** – keeps every update in memory so tests can assert on
//!   what the broker published.

pub mod logging;
pub mod recording;

pub use logging::LoggingHost;
pub use recording::RecordingHost;
