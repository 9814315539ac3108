use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failure category the recovery layer classifies against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Adapter,
    Timeout,
    Unsupported,
    Internal,
    Connection,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Adapter => "adapter",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
            ErrorKind::Connection => "connection",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// A tool argument is missing or has the wrong shape.
    #[error("Invalid argument '{field}': {message}")]
    Validation { field: String, message: String },

    /// The adapter answered with `success: false`, or the handshake failed.
    #[error("Adapter error in '{command}': {message}")]
    Adapter { command: String, message: String },

    #[error("Request '{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Spawn/connect failures and writes on a dead channel.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The owning connection went away while a request was outstanding.
    #[error("Adapter disconnected: {0}")]
    Disconnected(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn adapter(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Adapter {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::SessionNotFound(_) | Self::SessionExists(_) => {
                ErrorKind::Validation
            }
            Self::Adapter { .. } => ErrorKind::Adapter,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Connection(_) | Self::Disconnected(_) => ErrorKind::Connection,
            Self::InvalidMessage(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Field name for validation failures, `None` for every other variant.
    pub fn invalid_field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// True when the text of this error says the adapter connection dropped.
    pub fn indicates_dropped_connection(&self) -> bool {
        if matches!(self, Self::Disconnected(_)) {
            return true;
        }
        let text = self.to_string().to_lowercase();
        DROPPED_CONNECTION_MARKERS
            .iter()
            .any(|marker| text.contains(marker))
    }
}

const DROPPED_CONNECTION_MARKERS: &[&str] = &[
    "disconnected",
    "connection closed",
    "connection reset",
    "connection lost",
    "connection refused",
    "broken pipe",
    "not connected",
];

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidMessage(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Connection(err.to_string())
    }
}
