//! DAP Bridge Core
//!
//! A reusable async library that lets a tool-calling client drive debug adapters.
//! It frames Debug Adapter Protocol traffic over adapter stdio or TCP, correlates
//! requests with responses, multiplexes many debug sessions, translates tool calls,
//! adapter events and adapter responses, and applies a prioritized recovery chain
//! when calls fail.

pub mod adapter;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod mapping;
pub mod protocol;
pub mod recovery;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use adapter::{AdapterConnection, AdapterConnector, DebugAdapter, WireConnector};
pub use bridge::Bridge;
pub use client::{AdapterClient, ClientEvent, PendingResponse};
pub use config::{BridgeConfig, HandshakeConfig, HandshakeMode, RecoveryConfig, SessionConfig, TransportConfig};
pub use error::{BridgeError, ErrorKind};
pub use protocol::{Event, ProtocolMessage, Request, Response};
pub use recovery::{ErrorContext, ErrorRecovery, RecoveryOutcome, RecoveryStats, RecoveryStrategy};
pub use session::{Session, SessionId, SessionInfo, SessionManager, SessionSnapshot, SessionState};
pub use transport::{Transport, TransportEvent};
pub use types::{Notification, ToolCall, ToolCallRequest, ToolCallResult, ToolName, ToolOutput};

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
