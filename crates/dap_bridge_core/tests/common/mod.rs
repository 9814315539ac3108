//! Scripted debug adapter for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dap_bridge_core::framing::{encode_frame, FrameDecoder};
use dap_bridge_core::{
    AdapterClient, AdapterConnection, AdapterConnector, BridgeConfig, BridgeError, HandshakeConfig,
    RecoveryConfig, SessionConfig, Transport, TransportConfig,
};
use serde_json::{json, Value};
use tokio::io::{duplex, split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    pub supports_terminate: bool,
    /// Emit `stopped` (reason `entry`) on this thread after configurationDone.
    pub stop_on_entry_thread: Option<i64>,
    /// Commands that are recorded but never answered.
    pub silent: HashSet<String>,
    /// Commands answered with `success: false` and this message.
    pub failing: HashMap<String, String>,
    /// Commands that make the adapter drop the connection without answering.
    pub hang_up_on: HashSet<String>,
    pub unverified_lines: Vec<i64>,
}

impl FakeBehavior {
    pub fn silent(mut self, command: &str) -> Self {
        self.silent.insert(command.to_string());
        self
    }

    pub fn failing(mut self, command: &str, message: &str) -> Self {
        self.failing.insert(command.to_string(), message.to_string());
        self
    }

    pub fn hang_up_on(mut self, command: &str) -> Self {
        self.hang_up_on.insert(command.to_string());
        self
    }

    pub fn stop_on_entry(mut self, thread_id: i64) -> Self {
        self.stop_on_entry_thread = Some(thread_id);
        self
    }
}

enum Control {
    Event(String, Value),
    HangUp,
}

#[derive(Clone)]
pub struct FakeHandle {
    control: mpsc::UnboundedSender<Control>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeHandle {
    pub fn emit(&self, event: &str, body: Value) {
        let _ = self.control.send(Control::Event(event.to_string(), body));
    }

    pub fn hang_up(&self) {
        let _ = self.control.send(Control::HangUp);
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r["command"].as_str().map(str::to_string))
            .collect()
    }

    pub fn requests_for(&self, command: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r["command"] == command)
            .collect()
    }
}

/// Run a fake adapter on `stream` until the peer goes away or it hangs up.
pub fn spawn_fake_adapter<S>(stream: S, behavior: FakeBehavior) -> FakeHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handle = FakeHandle {
        control: control_tx,
        requests: requests.clone(),
    };

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(stream);
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0_u8; 8192];
        let mut out = Outbound { seq: 0 };

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    decoder.push(&buf[..n]);
                    for body in decoder.decode().messages {
                        let request: Value = serde_json::from_str(&body).unwrap();
                        requests.lock().unwrap().push(request.clone());
                        let frames = respond(&behavior, &request, &mut out);
                        let Some(frames) = frames else { return };
                        for frame in frames {
                            if writer.write_all(&frame).await.is_err() {
                                return;
                            }
                        }
                        let _ = writer.flush().await;
                    }
                }
                control = control_rx.recv() => match control {
                    Some(Control::Event(name, body)) => {
                        let frame = out.event(&name, body);
                        if writer.write_all(&frame).await.is_err() {
                            break;
                        }
                        let _ = writer.flush().await;
                    }
                    Some(Control::HangUp) | None => break,
                },
            }
        }
    });

    handle
}

struct Outbound {
    seq: i64,
}

impl Outbound {
    fn next(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn response(&mut self, request: &Value, body: Value) -> Vec<u8> {
        let message = json!({
            "seq": self.next(),
            "type": "response",
            "request_seq": request["seq"],
            "command": request["command"],
            "success": true,
            "body": body,
        });
        encode_frame(&message.to_string())
    }

    fn failure(&mut self, request: &Value, text: &str) -> Vec<u8> {
        let message = json!({
            "seq": self.next(),
            "type": "response",
            "request_seq": request["seq"],
            "command": request["command"],
            "success": false,
            "message": text,
        });
        encode_frame(&message.to_string())
    }

    fn event(&mut self, name: &str, body: Value) -> Vec<u8> {
        let message = json!({"seq": self.next(), "type": "event", "event": name, "body": body});
        encode_frame(&message.to_string())
    }
}

/// Frames to send back for one request; `None` closes the connection.
fn respond(behavior: &FakeBehavior, request: &Value, out: &mut Outbound) -> Option<Vec<Vec<u8>>> {
    let command = request["command"].as_str().unwrap_or_default();
    let args = &request["arguments"];

    if behavior.hang_up_on.contains(command) {
        return None;
    }
    if behavior.silent.contains(command) {
        return Some(vec![]);
    }
    if let Some(message) = behavior.failing.get(command) {
        return Some(vec![out.failure(request, message)]);
    }

    let thread_id = args["threadId"].as_i64().unwrap_or(1);
    let frames = match command {
        "initialize" => vec![
            out.response(
                request,
                json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsTerminateRequest": behavior.supports_terminate,
                    "supportsEvaluateForHovers": true,
                }),
            ),
            out.event("initialized", json!({})),
        ],
        "configurationDone" => {
            let mut frames = vec![out.response(request, json!({}))];
            if let Some(thread) = behavior.stop_on_entry_thread {
                frames.push(out.event(
                    "stopped",
                    json!({"reason": "entry", "threadId": thread, "allThreadsStopped": true}),
                ));
            }
            frames
        }
        "setBreakpoints" => {
            let source = args["source"].clone();
            let breakpoints: Vec<Value> = args["breakpoints"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(i, bp)| {
                    let line = bp["line"].as_i64().unwrap_or_default();
                    json!({
                        "id": i as i64 + 1,
                        "verified": !behavior.unverified_lines.contains(&line),
                        "line": line,
                        "source": source,
                    })
                })
                .collect();
            vec![out.response(request, json!({ "breakpoints": breakpoints }))]
        }
        "threads" => vec![out.response(
            request,
            json!({"threads": [{"id": 1, "name": "MainThread"}, {"id": 2, "name": "worker"}]}),
        )],
        "stackTrace" => vec![out.response(
            request,
            json!({
                "stackFrames": [
                    {"id": 1000, "name": "main", "line": 12, "column": 1, "source": {"path": "/src/app.py"}}
                ],
                "totalFrames": 1
            }),
        )],
        "scopes" => vec![out.response(
            request,
            json!({"scopes": [{"name": "Locals", "variablesReference": 1001, "expensive": false}]}),
        )],
        "variables" => vec![out.response(
            request,
            json!({"variables": [{"name": "x", "value": "42", "type": "int", "variablesReference": 0}]}),
        )],
        "evaluate" => {
            let expression = args["expression"].as_str().unwrap_or_default();
            let result = if expression == "1 + 1" { "2" } else { expression };
            vec![out.response(request, json!({"result": result, "type": "int", "variablesReference": 0}))]
        }
        "continue" => vec![
            out.response(request, json!({"allThreadsContinued": true})),
            out.event("continued", json!({"threadId": thread_id, "allThreadsContinued": true})),
        ],
        "next" | "stepIn" | "stepOut" => vec![
            out.response(request, json!({})),
            out.event("stopped", json!({"reason": "step", "threadId": thread_id})),
        ],
        "pause" => vec![
            out.response(request, json!({})),
            out.event("stopped", json!({"reason": "pause", "threadId": thread_id})),
        ],
        "terminate" => vec![
            out.response(request, json!({})),
            out.event("terminated", json!({})),
        ],
        _ => vec![out.response(request, json!({}))],
    };
    Some(frames)
}

/// Connector that hands out fake adapters over in-memory streams.
pub struct DuplexConnector {
    behavior: Mutex<FakeBehavior>,
    handles: Mutex<Vec<FakeHandle>>,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
}

impl DuplexConnector {
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            handles: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        })
    }

    /// Behavior for connections made from now on.
    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn handle(&self, index: usize) -> FakeHandle {
        self.handles.lock().unwrap()[index].clone()
    }

    pub fn last_handle(&self) -> FakeHandle {
        self.handles.lock().unwrap().last().cloned().expect("no adapter connected yet")
    }
}

#[async_trait]
impl AdapterConnector for DuplexConnector {
    async fn connect(
        &self,
        _config: &SessionConfig,
        request_timeout: Duration,
    ) -> dap_bridge_core::Result<AdapterConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BridgeError::Connection("connection refused".into()));
        }

        let (local, remote) = duplex(256 * 1024);
        let behavior = self.behavior.lock().unwrap().clone();
        self.handles
            .lock()
            .unwrap()
            .push(spawn_fake_adapter(remote, behavior));

        let (reader, writer) = split(local);
        let (transport, transport_events) = Transport::from_streams(reader, writer);
        let (client, events) = AdapterClient::new(transport, transport_events, request_timeout);
        Ok(AdapterConnection::from_client(client, events))
    }
}

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        request_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        disconnect_timeout: Duration::from_millis(500),
        recovery: RecoveryConfig {
            reconnect_delay: Duration::from_millis(10),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(40),
            ..RecoveryConfig::default()
        },
    }
}

pub fn launch_config(session_id: &str) -> SessionConfig {
    SessionConfig::new(
        TransportConfig::spawn("fake-adapter", vec![]),
        HandshakeConfig {
            program: Some("/src/app.py".into()),
            ..HandshakeConfig::default()
        },
    )
    .with_session_id(session_id)
}

/// Wait for a notification with `method`, skipping others.
pub async fn expect_notification(
    rx: &mut mpsc::UnboundedReceiver<dap_bridge_core::Notification>,
    method: &str,
) -> dap_bridge_core::Notification {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let next = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {method}"))
            .expect("notification channel closed");
        if next.method == method {
            return next;
        }
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
