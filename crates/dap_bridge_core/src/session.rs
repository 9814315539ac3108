//! Debug session lifecycle and multiplexing.
//!
//! Each `Session` owns exactly one adapter connection plus what has been learned
//! about the debuggee from adapter events. The `SessionManager` owns the set of
//! live sessions, drives the handshake for new ones, and runs one event pump
//! per connection that turns adapter events into notifications in order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapter::{AdapterConnector, DebugAdapter};
use crate::client::ClientEvent;
use crate::config::{BridgeConfig, HandshakeConfig, HandshakeMode, InitialBreakpoints, SessionConfig};
use crate::handshake::{self, HandshakeOutcome, InitializedSignal};
use crate::mapping::{timestamp_millis, EventMapper};
use crate::protocol::Response;
use crate::types::{AdapterEvent, Notification};
use crate::{BridgeError, Result};

pub type SessionId = String;

type Registry = Arc<RwLock<HashMap<SessionId, Arc<Session>>>>;

/// Events still drained after `terminated`/`exited` before the adapter is closed.
const TERMINAL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Running,
    Stopped,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Last-known threads and breakpoints of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Thread id → name.
    pub threads: BTreeMap<i64, String>,
    /// Source path → breakpoints as last reported by the adapter.
    pub breakpoints: BTreeMap<String, Vec<Value>>,
    pub last_stopped_thread: Option<i64>,
    pub last_stop_reason: Option<String>,
}

impl SessionSnapshot {
    /// Requested breakpoint lines per source, for re-arming a new connection.
    fn initial_breakpoints(&self) -> Vec<InitialBreakpoints> {
        self.breakpoints
            .iter()
            .map(|(source_path, breakpoints)| InitialBreakpoints {
                source_path: source_path.clone(),
                lines: breakpoints
                    .iter()
                    .filter_map(|bp| bp.get("line").and_then(Value::as_i64))
                    .collect(),
            })
            .filter(|initial| !initial.lines.is_empty())
            .collect()
    }

    fn apply_breakpoint_change(&mut self, reason: &str, breakpoint: Value) {
        let Some(id) = breakpoint.get("id").and_then(Value::as_i64) else {
            return;
        };
        let mut found = false;
        for list in self.breakpoints.values_mut() {
            if let Some(pos) = list.iter().position(|bp| bp.get("id").and_then(Value::as_i64) == Some(id)) {
                found = true;
                if reason == "removed" {
                    list.remove(pos);
                } else {
                    list[pos] = breakpoint.clone();
                }
            }
        }
        if !found && reason == "new" {
            let path = breakpoint
                .get("source")
                .and_then(|s| s.get("path"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(path) = path {
                self.breakpoints.entry(path).or_default().push(breakpoint);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub transport: String,
    pub connected: bool,
    pub created_at: u64,
    pub last_stopped_thread: Option<i64>,
    pub thread_count: usize,
}

struct SessionInner {
    adapter: Option<Arc<dyn DebugAdapter>>,
    state: SessionState,
    capabilities: Map<String, Value>,
    snapshot: SessionSnapshot,
    generation: u64,
    connected: bool,
    pump: Option<JoinHandle<()>>,
}

pub struct Session {
    id: SessionId,
    config: SessionConfig,
    created_at: u64,
    order: u64,
    inner: Mutex<SessionInner>,
    /// Serializes reconnects of this session.
    reconnect_lock: Mutex<()>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("created_at", &self.created_at)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(id: SessionId, config: SessionConfig, order: u64) -> Self {
        Self {
            id,
            config,
            created_at: timestamp_millis(),
            order,
            inner: Mutex::new(SessionInner {
                adapter: None,
                state: SessionState::Uninitialized,
                capabilities: Map::new(),
                snapshot: SessionSnapshot::default(),
                generation: 0,
                connected: false,
                pump: None,
            }),
            reconnect_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn capabilities(&self) -> Map<String, Value> {
        self.inner.lock().await.capabilities.clone()
    }

    pub async fn supports(&self, flag: &str) -> bool {
        handshake::supports(&self.inner.lock().await.capabilities, flag)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn last_stopped_thread(&self) -> Option<i64> {
        self.inner.lock().await.snapshot.last_stopped_thread
    }

    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.connected && inner.adapter.as_ref().is_some_and(|a| a.is_connected())
    }

    pub async fn adapter(&self) -> Option<Arc<dyn DebugAdapter>> {
        self.inner.lock().await.adapter.clone()
    }

    pub async fn info(&self) -> SessionInfo {
        let inner = self.inner.lock().await;
        SessionInfo {
            id: self.id.clone(),
            state: inner.state,
            transport: self.config.transport.describe(),
            connected: inner.connected && inner.adapter.as_ref().is_some_and(|a| a.is_connected()),
            created_at: self.created_at,
            last_stopped_thread: inner.snapshot.last_stopped_thread,
            thread_count: inner.snapshot.threads.len(),
        }
    }

    /// Send one request over this session's current adapter.
    pub async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        let adapter = {
            let inner = self.inner.lock().await;
            match &inner.adapter {
                Some(adapter) if inner.connected => adapter.clone(),
                _ => {
                    return Err(BridgeError::Disconnected(format!(
                        "session '{}' is not connected",
                        self.id
                    )))
                }
            }
        };
        adapter.request(command, arguments).await
    }

    pub(crate) async fn set_state(&self, state: SessionState) {
        let mut inner = self.inner.lock().await;
        transition(&self.id, &mut inner.state, state);
    }

    /// Record that a resume-type call succeeded.
    pub(crate) async fn mark_resumed(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Stopped {
            transition(&self.id, &mut inner.state, SessionState::Running);
        }
    }

    pub(crate) async fn record_threads(&self, threads: &[(i64, String)]) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.threads = threads.iter().cloned().collect();
    }

    pub(crate) async fn record_breakpoints(&self, source_path: &str, breakpoints: Vec<Value>) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.breakpoints.insert(source_path.to_string(), breakpoints);
    }

    async fn attach(&self, adapter: Arc<dyn DebugAdapter>) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.adapter = Some(adapter);
        inner.connected = true;
        transition(&self.id, &mut inner.state, SessionState::Initializing);
        inner.generation
    }

    async fn set_pump(&self, pump: JoinHandle<()>) {
        if let Some(previous) = self.inner.lock().await.pump.replace(pump) {
            previous.abort();
        }
    }

    async fn apply_handshake(&self, outcome: HandshakeOutcome) {
        let mut inner = self.inner.lock().await;
        inner.capabilities.extend(outcome.capabilities);
        for (source_path, breakpoints) in outcome.breakpoints {
            inner.snapshot.breakpoints.insert(source_path, breakpoints);
        }
        if inner.state == SessionState::Initializing {
            transition(&self.id, &mut inner.state, SessionState::Running);
        }
    }

    /// Apply one adapter event to state and snapshot.
    async fn apply_event(&self, event: &AdapterEvent, initialized: &InitializedSignal) {
        let mut inner = self.inner.lock().await;
        match event {
            AdapterEvent::Initialized => initialized.mark(),
            AdapterEvent::Stopped(stopped) => {
                if let Some(thread_id) = stopped.thread_id {
                    inner.snapshot.last_stopped_thread = Some(thread_id);
                }
                inner.snapshot.last_stop_reason = Some(stopped.reason.clone());
                transition(&self.id, &mut inner.state, SessionState::Stopped);
            }
            AdapterEvent::Continued(_) => {
                if inner.state == SessionState::Stopped {
                    transition(&self.id, &mut inner.state, SessionState::Running);
                }
            }
            AdapterEvent::Thread(thread) => match thread.reason.as_str() {
                "exited" => {
                    inner.snapshot.threads.remove(&thread.thread_id);
                }
                _ => {
                    inner
                        .snapshot
                        .threads
                        .entry(thread.thread_id)
                        .or_insert_with(|| format!("Thread {}", thread.thread_id));
                }
            },
            AdapterEvent::Breakpoint(changed) => {
                let breakpoint = json!(changed.breakpoint);
                inner.snapshot.apply_breakpoint_change(&changed.reason, breakpoint);
            }
            AdapterEvent::Capabilities(capabilities) => {
                inner.capabilities.extend(capabilities.clone());
            }
            AdapterEvent::Terminated { .. } | AdapterEvent::Exited(_) => {
                transition(&self.id, &mut inner.state, SessionState::Terminated);
            }
            AdapterEvent::Output(_) | AdapterEvent::Unknown { .. } => {}
        }
    }

    async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Mark the connection lost. Returns the state at the time.
    async fn mark_disconnected(&self) -> SessionState {
        let mut inner = self.inner.lock().await;
        inner.connected = false;
        inner.state
    }

    /// Disconnect the current adapter and forget it; bumps the generation so
    /// its pump stops reporting.
    async fn retire_adapter(&self) -> Option<Arc<dyn DebugAdapter>> {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.connected = false;
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        inner.adapter.take()
    }

    /// Best-effort `disconnect` request, then close everything.
    async fn shutdown(&self, disconnect_timeout: Duration) {
        let adapter = {
            let mut inner = self.inner.lock().await;
            transition(&self.id, &mut inner.state, SessionState::Terminated);
            inner.connected = false;
            inner.adapter.clone()
        };

        if let Some(adapter) = adapter {
            if adapter.is_connected() {
                let terminate = self.config.handshake.mode == HandshakeMode::Launch;
                let arguments = json!({ "restart": false, "terminateDebuggee": terminate });
                match tokio::time::timeout(disconnect_timeout, adapter.request("disconnect", Some(arguments))).await {
                    Ok(Ok(_)) => debug!(session_id = %self.id, "Adapter acknowledged disconnect"),
                    Ok(Err(e)) => warn!(session_id = %self.id, "Disconnect request failed: {}", e),
                    Err(_) => warn!(session_id = %self.id, ?disconnect_timeout, "Disconnect request timed out"),
                }
            }
            adapter.disconnect().await;
        }
    }

    async fn abort_pump(&self) {
        if let Some(pump) = self.inner.lock().await.pump.take() {
            pump.abort();
        }
    }
}

fn transition(id: &str, state: &mut SessionState, next: SessionState) {
    if *state == next || *state == SessionState::Terminated {
        return;
    }
    debug!(session_id = %id, from = %state, to = %next, "Session state change");
    *state = next;
}

/// Releases a claimed id when creation finishes.
struct InFlight {
    ids: Arc<std::sync::Mutex<HashSet<SessionId>>>,
    id: SessionId,
}

impl InFlight {
    fn claim(ids: &Arc<std::sync::Mutex<HashSet<SessionId>>>, id: &str) -> Result<Self> {
        let mut set = ids
            .lock()
            .map_err(|_| BridgeError::Internal("session claim table poisoned".to_string()))?;
        if !set.insert(id.to_string()) {
            return Err(BridgeError::SessionExists(id.to_string()));
        }
        Ok(Self {
            ids: ids.clone(),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut set) = self.ids.lock() {
            set.remove(&self.id);
        }
    }
}

pub struct SessionManager {
    config: BridgeConfig,
    connector: Arc<dyn AdapterConnector>,
    sessions: Registry,
    in_flight: Arc<std::sync::Mutex<HashSet<SessionId>>>,
    next_order: AtomicU64,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl SessionManager {
    /// Returns the manager and the ordered stream of notifications for every
    /// session it will own.
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn AdapterConnector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (notifications, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            config,
            connector,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(std::sync::Mutex::new(HashSet::new())),
            next_order: AtomicU64::new(0),
            notifications,
        });
        (manager, rx)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connect, handshake and register a new session.
    pub async fn create_session(&self, config: SessionConfig) -> Result<Arc<Session>> {
        let id = config
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let _claim = InFlight::claim(&self.in_flight, &id)?;
        if self.sessions.read().await.contains_key(&id) {
            return Err(BridgeError::SessionExists(id));
        }

        info!(session_id = %id, transport = %config.transport.describe(), "Creating debug session");
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id.clone(), config, order));

        let handshake = session.config.handshake.clone();
        if let Err(e) = self.connect_and_handshake(&session, &handshake).await {
            warn!(session_id = %id, "Session creation failed: {}", e);
            session.set_state(SessionState::Terminated).await;
            return Err(e);
        }

        if session.state().await == SessionState::Terminated {
            // Finished during startup; never becomes active.
            info!(session_id = %id, "Debuggee terminated during handshake");
            return Ok(session);
        }
        self.sessions.write().await.insert(id.clone(), session.clone());
        info!(session_id = %id, "Debug session ready");
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.order);
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// The most recently created live session.
    pub async fn most_recent_session(&self) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .max_by_key(|s| s.order)
            .cloned()
    }

    /// Tear a session down. Returns whether it was registered.
    pub async fn destroy_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        let Some(session) = removed else {
            debug!(session_id = %id, "Destroy requested for unknown session");
            return false;
        };
        info!(session_id = %id, "Destroying debug session");
        session.shutdown(self.config.disconnect_timeout).await;
        true
    }

    /// Replace a session's adapter connection, keeping its id, and re-run the
    /// handshake. Breakpoints known from the old connection are re-armed.
    pub async fn reconnect(&self, id: &str) -> Result<Arc<Session>> {
        let session = self.get_session(id).await?;
        let _turn = session.reconnect_lock.lock().await;
        self.ensure_registered(&session).await?;
        self.reconnect_locked(&session).await?;
        Ok(session.clone())
    }

    /// Reconnect a session whose connection dropped. Callers that queued behind
    /// a reconnect of the same session get the restored session back without
    /// another connect.
    pub async fn restore_connection(&self, id: &str) -> Result<Arc<Session>> {
        let session = self.get_session(id).await?;
        let _turn = session.reconnect_lock.lock().await;
        self.ensure_registered(&session).await?;
        if session.is_connected().await {
            debug!(session_id = %id, "Session already reconnected");
            return Ok(session.clone());
        }
        self.reconnect_locked(&session).await?;
        Ok(session.clone())
    }

    async fn ensure_registered(&self, session: &Arc<Session>) -> Result<()> {
        let sessions = self.sessions.read().await;
        match sessions.get(&session.id) {
            Some(current) if Arc::ptr_eq(current, session) => Ok(()),
            _ => Err(BridgeError::SessionNotFound(session.id.clone())),
        }
    }

    async fn reconnect_locked(&self, session: &Arc<Session>) -> Result<()> {
        let id = &session.id;
        info!(session_id = %id, "Reconnecting debug session");
        if let Some(old) = session.retire_adapter().await {
            old.disconnect().await;
        }

        let mut handshake = session.config.handshake.clone();
        let known = session.snapshot().await.initial_breakpoints();
        if !known.is_empty() {
            handshake.breakpoints = known;
        }

        match self.connect_and_handshake(session, &handshake).await {
            Ok(()) => {
                info!(session_id = %id, "Debug session reconnected");
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %id, "Reconnect failed, dropping session: {}", e);
                self.unregister(session).await;
                session.set_state(SessionState::Terminated).await;
                Err(e)
            }
        }
    }

    /// Destroy every session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.destroy_session(&id).await;
        }
    }

    async fn unregister(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&session.id).is_some_and(|s| Arc::ptr_eq(s, session)) {
            sessions.remove(&session.id);
        }
    }

    async fn connect_and_handshake(&self, session: &Arc<Session>, handshake: &HandshakeConfig) -> Result<()> {
        let request_timeout = session
            .config
            .request_timeout()
            .unwrap_or(self.config.request_timeout);
        let connection = self.connector.connect(&session.config, request_timeout).await?;
        let adapter = connection.adapter.clone();

        let initialized = Arc::new(InitializedSignal::new());
        let generation = session.attach(adapter.clone()).await;
        let pump = EventPump {
            session: session.clone(),
            generation,
            initialized: initialized.clone(),
            registry: self.sessions.clone(),
            notifications: self.notifications.clone(),
        };
        let span = info_span!("session", session_id = %session.id, generation);
        session
            .set_pump(tokio::spawn(pump.run(connection.events).instrument(span)))
            .await;

        let outcome = handshake::perform_handshake(
            adapter.as_ref(),
            handshake,
            &initialized,
            self.config.handshake_timeout,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                session.apply_handshake(outcome).await;
                Ok(())
            }
            Err(e) => {
                session.abort_pump().await;
                adapter.disconnect().await;
                Err(e)
            }
        }
    }
}

/// Per-connection task: session bookkeeping plus one notification per event.
struct EventPump {
    session: Arc<Session>,
    generation: u64,
    initialized: Arc<InitializedSignal>,
    registry: Registry,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl EventPump {
    async fn run(self, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
        debug!("Event pump started");
        let mut terminal_seen = false;

        loop {
            let next = if terminal_seen {
                tokio::time::timeout(TERMINAL_GRACE, events.recv()).await.ok().flatten()
            } else {
                events.recv().await
            };
            let Some(next) = next else { break };

            match next {
                ClientEvent::Event(event) => {
                    let parsed = AdapterEvent::parse(&event);
                    self.session.apply_event(&parsed, &self.initialized).await;
                    self.publish(EventMapper::map(&self.session.id, &event));

                    if parsed.is_terminal() && !terminal_seen {
                        terminal_seen = true;
                        info!(event = %event.event, "Debuggee finished");
                        self.unregister().await;
                    }
                }
                ClientEvent::Error(message) => warn!("Adapter connection error: {}", message),
                ClientEvent::Disconnected(exit) => {
                    if self.session.generation().await != self.generation {
                        break;
                    }
                    let state = self.session.mark_disconnected().await;
                    if state != SessionState::Terminated && self.is_registered().await {
                        warn!(code = ?exit.code, signal = ?exit.signal, "Adapter connection lost");
                        self.publish(EventMapper::connection_lost(&self.session.id, exit));
                    }
                    break;
                }
            }
        }

        if terminal_seen {
            if let Some(adapter) = self.session.adapter().await {
                adapter.disconnect().await;
            }
        }
        debug!("Event pump stopped");
    }

    fn publish(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("Notification receiver dropped");
        }
    }

    async fn is_registered(&self) -> bool {
        self.registry
            .read()
            .await
            .get(&self.session.id)
            .is_some_and(|s| Arc::ptr_eq(s, &self.session))
    }

    async fn unregister(&self) {
        let mut sessions = self.registry.write().await;
        if sessions
            .get(&self.session.id)
            .is_some_and(|s| Arc::ptr_eq(s, &self.session))
        {
            sessions.remove(&self.session.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_is_absorbing() {
        let mut state = SessionState::Running;
        transition("s", &mut state, SessionState::Stopped);
        assert_eq!(state, SessionState::Stopped);
        transition("s", &mut state, SessionState::Terminated);
        transition("s", &mut state, SessionState::Running);
        assert_eq!(state, SessionState::Terminated);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Stopped.to_string(), "stopped");
        assert_eq!(serde_json::to_value(SessionState::Initializing).unwrap(), "initializing");
    }

    #[test]
    fn test_snapshot_breakpoint_changes() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.breakpoints.insert(
            "/src/a.py".into(),
            vec![json!({"id": 1, "verified": false, "line": 3})],
        );

        snapshot.apply_breakpoint_change("changed", json!({"id": 1, "verified": true, "line": 4}));
        assert_eq!(snapshot.breakpoints["/src/a.py"][0]["line"], 4);

        snapshot.apply_breakpoint_change(
            "new",
            json!({"id": 2, "verified": true, "line": 9, "source": {"path": "/src/b.py"}}),
        );
        assert_eq!(snapshot.breakpoints["/src/b.py"].len(), 1);

        snapshot.apply_breakpoint_change("removed", json!({"id": 1, "verified": true}));
        assert!(snapshot.breakpoints["/src/a.py"].is_empty());
    }

    #[test]
    fn test_initial_breakpoints_from_snapshot() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.breakpoints.insert(
            "/src/a.py".into(),
            vec![json!({"verified": true, "line": 3}), json!({"verified": false, "line": 8})],
        );
        snapshot.breakpoints.insert("/src/empty.py".into(), vec![]);

        let initial = snapshot.initial_breakpoints();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].lines, vec![3, 8]);
    }

    #[test]
    fn test_in_flight_claim_is_exclusive_and_released() {
        let ids = Arc::new(std::sync::Mutex::new(HashSet::new()));
        let first = InFlight::claim(&ids, "s1").unwrap();
        assert!(matches!(InFlight::claim(&ids, "s1"), Err(BridgeError::SessionExists(_))));
        drop(first);
        assert!(InFlight::claim(&ids, "s1").is_ok());
    }
}
