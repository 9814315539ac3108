//! The initialize → launch/attach → configurationDone exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::adapter::DebugAdapter;
use crate::config::{HandshakeConfig, HandshakeMode, InitialBreakpoints};
use crate::{BridgeError, Result};

const CLIENT_ID: &str = "dap-bridge";

/// Set by the event pump when the adapter sends `initialized`.
#[derive(Debug, Default)]
pub struct InitializedSignal {
    seen: AtomicBool,
    notify: Notify,
}

impl InitializedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.seen.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.seen.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for the event; returns whether it was seen.
    pub async fn wait(&self, limit: Duration) -> bool {
        let notified = self.notify.notified();
        if self.is_set() {
            return true;
        }
        let _ = tokio::time::timeout(limit, notified).await;
        self.is_set()
    }
}

/// What the session learns from a successful handshake.
#[derive(Debug, Clone, Default)]
pub struct HandshakeOutcome {
    pub capabilities: Map<String, Value>,
    /// Adapter-reported breakpoints per source for the initial set.
    pub breakpoints: Vec<(String, Vec<Value>)>,
}

/// Drive the full handshake, bounded by `limit`.
pub async fn perform_handshake(
    adapter: &dyn DebugAdapter,
    config: &HandshakeConfig,
    initialized: &InitializedSignal,
    limit: Duration,
) -> Result<HandshakeOutcome> {
    match tokio::time::timeout(limit, run(adapter, config, initialized, limit)).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e @ BridgeError::Adapter { .. })) => Err(e),
        Ok(Err(e)) => Err(BridgeError::adapter("handshake", e.to_string())),
        Err(_) => Err(BridgeError::adapter(
            "handshake",
            format!("adapter did not complete the handshake within {limit:?}"),
        )),
    }
}

async fn run(
    adapter: &dyn DebugAdapter,
    config: &HandshakeConfig,
    initialized: &InitializedSignal,
    limit: Duration,
) -> Result<HandshakeOutcome> {
    let response = adapter
        .request("initialize", Some(initialize_args(&config.adapter_id)))
        .await?;
    let capabilities = response
        .body
        .and_then(|body| body.as_object().cloned())
        .unwrap_or_default();
    debug!(count = capabilities.len(), "Adapter capabilities received");

    // launch/attach often only answers after configurationDone, so don't await it yet.
    let command = config.mode.command();
    let started = adapter
        .begin_request(command, Some(start_args(config)))
        .await?;

    if !initialized.wait(limit / 2).await {
        warn!("Adapter never sent 'initialized'; continuing with configuration");
    }

    let mut breakpoints = Vec::new();
    for initial in &config.breakpoints {
        match adapter
            .request("setBreakpoints", Some(set_breakpoints_args(initial)))
            .await
        {
            Ok(response) => {
                let reported = response
                    .body
                    .as_ref()
                    .and_then(|b| b.get("breakpoints"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                breakpoints.push((initial.source_path.clone(), reported));
            }
            Err(e) => warn!(source = %initial.source_path, "Initial breakpoints rejected: {}", e),
        }
    }

    if supports(&capabilities, "supportsConfigurationDoneRequest") {
        adapter.request("configurationDone", Some(json!({}))).await?;
    }

    started.wait().await?;
    info!(mode = command, "Debug adapter handshake complete");

    Ok(HandshakeOutcome {
        capabilities,
        breakpoints,
    })
}

pub fn supports(capabilities: &Map<String, Value>, flag: &str) -> bool {
    capabilities.get(flag).and_then(Value::as_bool).unwrap_or(false)
}

pub fn initialize_args(adapter_id: &str) -> Value {
    json!({
        "adapterID": adapter_id,
        "clientID": CLIENT_ID,
        "clientName": CLIENT_ID,
        "locale": "en-US",
        "pathFormat": "path",
        "linesStartAt1": true,
        "columnsStartAt1": true,
        "supportsVariableType": true,
        "supportsVariablePaging": true,
        "supportsRunInTerminalRequest": false,
    })
}

/// Arguments for the `launch` or `attach` request.
pub fn start_args(config: &HandshakeConfig) -> Value {
    let mut args = Map::new();
    match config.mode {
        HandshakeMode::Launch => {
            if let Some(program) = &config.program {
                args.insert("program".to_string(), json!(program));
            }
            args.insert("args".to_string(), json!(config.args));
            if let Some(cwd) = &config.cwd {
                args.insert("cwd".to_string(), json!(cwd));
            }
            if !config.env.is_empty() {
                args.insert("env".to_string(), json!(config.env));
            }
            args.insert("stopOnEntry".to_string(), json!(config.stop_on_entry));
        }
        HandshakeMode::Attach => {
            if let Some(pid) = config.pid {
                args.insert("pid".to_string(), json!(pid));
            }
            if let Some(program) = &config.program {
                args.insert("program".to_string(), json!(program));
            }
            if config.stop_on_entry {
                args.insert("stopOnEntry".to_string(), json!(true));
            }
        }
    }
    for (key, value) in &config.extra {
        args.insert(key.clone(), value.clone());
    }
    Value::Object(args)
}

fn set_breakpoints_args(initial: &InitialBreakpoints) -> Value {
    let breakpoints: Vec<Value> = initial.lines.iter().map(|line| json!({ "line": line })).collect();
    json!({
        "source": { "path": initial.source_path },
        "breakpoints": breakpoints,
    })
}
