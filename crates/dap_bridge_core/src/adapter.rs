//! The adapter seam the session manager depends on.
//!
//! A session only ever talks to a `DebugAdapter`; where the adapter comes from
//! (a spawned process, a socket, or a target-specific provider that owns its own
//! stream) is decided by an `AdapterConnector`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::{AdapterClient, ClientEvent, PendingResponse};
use crate::config::SessionConfig;
use crate::protocol::Response;
use crate::transport::Transport;
use crate::Result;

#[async_trait]
pub trait DebugAdapter: Send + Sync {
    /// Write a request and return a handle for its eventual response.
    async fn begin_request(&self, command: &str, arguments: Option<Value>) -> Result<PendingResponse>;

    async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        self.begin_request(command, arguments).await?.wait().await
    }

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn pending_count(&self) -> usize;
}

/// A live adapter plus the ordered stream of its unsolicited activity.
pub struct AdapterConnection {
    pub adapter: Arc<dyn DebugAdapter>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl AdapterConnection {
    pub fn from_client(client: AdapterClient, events: mpsc::UnboundedReceiver<ClientEvent>) -> Self {
        Self {
            adapter: Arc::new(client),
            events,
        }
    }
}

#[async_trait]
pub trait AdapterConnector: Send + Sync {
    async fn connect(&self, config: &SessionConfig, request_timeout: Duration) -> Result<AdapterConnection>;
}

/// Connects over the session's configured spawn command or TCP endpoint.
#[derive(Debug, Clone)]
pub struct WireConnector {
    connect_timeout: Duration,
}

impl WireConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl AdapterConnector for WireConnector {
    async fn connect(&self, config: &SessionConfig, request_timeout: Duration) -> Result<AdapterConnection> {
        let (transport, transport_events) = Transport::new(config.transport.clone(), self.connect_timeout);
        transport.connect().await?;
        let (client, events) = AdapterClient::new(transport, transport_events, request_timeout);
        Ok(AdapterConnection::from_client(client, events))
    }
}
