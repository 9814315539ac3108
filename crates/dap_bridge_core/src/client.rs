//! Request/response correlation over one transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::adapter::DebugAdapter;
use crate::protocol::{Event, ProtocolMessage, Request, Response};
use crate::transport::{ExitInfo, Transport, TransportEvent};
use crate::{BridgeError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Responder = oneshot::Sender<Result<Response>>;
type PendingMap = Arc<Mutex<HashMap<i64, PendingRequest>>>;

/// Something the adapter said or did that no request asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Event(Event),
    Error(String),
    Disconnected(ExitInfo),
}

struct PendingRequest {
    command: String,
    responder: Responder,
    timeout: JoinHandle<()>,
    sent_at: Instant,
}

impl PendingRequest {
    fn resolve(self, outcome: Result<Response>) {
        self.timeout.abort();
        if self.responder.send(outcome).is_err() {
            debug!(command = %self.command, "Response receiver dropped before delivery");
        }
    }
}

/// Handle to a request that has been written but not yet answered.
#[derive(Debug)]
pub struct PendingResponse {
    seq: i64,
    command: String,
    rx: oneshot::Receiver<Result<Response>>,
}

impl PendingResponse {
    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the outcome; `success: false` responses become adapter errors.
    pub async fn wait(self) -> Result<Response> {
        let response = self.rx.await.map_err(|_| {
            BridgeError::Disconnected(format!(
                "response channel closed while waiting for '{}'",
                self.command
            ))
        })??;

        if !response.success {
            return Err(BridgeError::adapter(&self.command, response.error_message()));
        }
        Ok(response)
    }

    /// Wait for the raw response, failed or not.
    pub async fn wait_raw(self) -> Result<Response> {
        self.rx.await.map_err(|_| {
            BridgeError::Disconnected(format!(
                "response channel closed while waiting for '{}'",
                self.command
            ))
        })?
    }
}

pub struct AdapterClient {
    transport: Arc<Transport>,
    /// Held from sequence allocation until the request is written.
    next_seq: Mutex<i64>,
    pending: PendingMap,
    request_timeout: Duration,
    disconnected: AtomicBool,
    dispatch_task: JoinHandle<()>,
}

impl AdapterClient {
    /// Take ownership of a transport and its signal stream. Returns the client
    /// and the ordered stream of unsolicited adapter activity.
    pub fn new(
        transport: Transport,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatch_task = tokio::spawn(dispatch_loop(transport_events, pending.clone(), events_tx));

        let client = Self {
            transport: Arc::new(transport),
            next_seq: Mutex::new(1),
            pending,
            request_timeout,
            disconnected: AtomicBool::new(false),
            dispatch_task,
        };
        (client, events_rx)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Allocate a sequence number, register the pending entry and write the request.
    pub async fn send_request_begin(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<PendingResponse> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BridgeError::Disconnected(format!(
                "cannot send '{command}' on a disconnected client"
            )));
        }

        let mut next_seq = self.next_seq.lock().await;
        let seq = *next_seq;
        *next_seq += 1;
        let request = ProtocolMessage::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        let body = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                seq,
                PendingRequest {
                    command: command.to_string(),
                    responder: tx,
                    timeout: spawn_timeout(self.pending.clone(), seq, command, self.request_timeout),
                    sent_at: Instant::now(),
                },
            );
        }

        debug!(seq, command, "Sending DAP request");
        if let Err(e) = self.transport.send(&body).await {
            if let Some(entry) = self.pending.lock().await.remove(&seq) {
                entry.timeout.abort();
            }
            return Err(e);
        }
        drop(next_seq);

        Ok(PendingResponse {
            seq,
            command: command.to_string(),
            rx,
        })
    }

    /// Send a request and wait for its successful response.
    pub async fn send_request(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        self.send_request_begin(command, arguments).await?.wait().await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Fail every outstanding request and close the transport. Idempotent.
    pub async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        fail_all_pending(&self.pending, "client disconnected").await;
        self.transport.close().await;
    }
}

impl Drop for AdapterClient {
    fn drop(&mut self) {
        self.dispatch_task.abort();
    }
}

#[async_trait]
impl DebugAdapter for AdapterClient {
    async fn begin_request(&self, command: &str, arguments: Option<Value>) -> Result<PendingResponse> {
        self.send_request_begin(command, arguments).await
    }

    async fn disconnect(&self) {
        AdapterClient::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        AdapterClient::is_connected(self)
    }

    async fn pending_count(&self) -> usize {
        AdapterClient::pending_count(self).await
    }
}

fn spawn_timeout(pending: PendingMap, seq: i64, command: &str, after: Duration) -> JoinHandle<()> {
    let command = command.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        // Remove first so a late response is treated as unknown.
        let entry = pending.lock().await.remove(&seq);
        if let Some(entry) = entry {
            warn!(seq, command = %command, ?after, "DAP request timed out");
            let _ = entry.responder.send(Err(BridgeError::Timeout { command, after }));
        }
    })
}

async fn fail_all_pending(pending: &PendingMap, reason: &str) {
    let drained: Vec<(i64, PendingRequest)> = pending.lock().await.drain().collect();
    if !drained.is_empty() {
        debug!(count = drained.len(), reason, "Failing pending DAP requests");
    }
    for (seq, entry) in drained {
        let message = format!("request {seq} ('{}') abandoned: {reason}", entry.command);
        entry.resolve(Err(BridgeError::Disconnected(message)));
    }
}

async fn dispatch_loop(
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    pending: PendingMap,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    while let Some(signal) = transport_events.recv().await {
        match signal {
            TransportEvent::Connected => debug!("Adapter transport connected"),
            TransportEvent::Message(body) => handle_message(&body, &pending, &events).await,
            TransportEvent::Error(message) => {
                warn!("Adapter transport error: {}", message);
                let _ = events.send(ClientEvent::Error(message));
            }
            TransportEvent::Disconnected(info) => {
                fail_all_pending(&pending, "adapter disconnected").await;
                let _ = events.send(ClientEvent::Disconnected(info));
                break;
            }
        }
    }
}

async fn handle_message(
    body: &str,
    pending: &PendingMap,
    events: &mpsc::UnboundedSender<ClientEvent>,
) {
    let message = match serde_json::from_str::<ProtocolMessage>(body) {
        Ok(message) => message,
        Err(e) => {
            warn!(body, "Dropping unrecognized adapter message: {}", e);
            return;
        }
    };

    match message {
        ProtocolMessage::Response(response) => {
            let entry = pending.lock().await.remove(&response.request_seq);
            match entry {
                Some(entry) => {
                    trace!(
                        request_seq = response.request_seq,
                        command = %entry.command,
                        elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                        success = response.success,
                        "DAP response received"
                    );
                    entry.resolve(Ok(response));
                }
                None => warn!(
                    request_seq = response.request_seq,
                    command = %response.command,
                    "Received response for unknown request"
                ),
            }
        }
        ProtocolMessage::Event(event) => {
            trace!(event = %event.event, "DAP event received");
            let _ = events.send(ClientEvent::Event(event));
        }
        ProtocolMessage::Request(request) => {
            warn!(
                command = %request.command,
                "Dropping reverse request from adapter (not supported)"
            );
        }
    }
}
