//! Stateless translators between tool calls, adapter requests, adapter
//! responses and notifications.

pub mod command;
pub mod event;
pub mod response;

pub use command::CommandMapper;
pub use event::EventMapper;
pub use response::ResponseMapper;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
