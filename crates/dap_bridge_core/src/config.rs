use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide settings for the bridge context.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Default per-request timeout for every adapter client.
    pub request_timeout: Duration,
    /// Upper bound for spawning/connecting an adapter.
    pub connect_timeout: Duration,
    /// Upper bound for the whole initialize → launch/attach handshake.
    pub handshake_timeout: Duration,
    /// Upper bound for the best-effort `disconnect` sent on teardown.
    pub disconnect_timeout: Duration,
    pub recovery: RecoveryConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            recovery: RecoveryConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source; unset or unparsable
    /// values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            request_timeout: millis("DAP_BRIDGE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT),
            connect_timeout: millis("DAP_BRIDGE_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT),
            handshake_timeout: millis("DAP_BRIDGE_HANDSHAKE_TIMEOUT_MS", DEFAULT_HANDSHAKE_TIMEOUT),
            disconnect_timeout: millis("DAP_BRIDGE_DISCONNECT_TIMEOUT_MS", DEFAULT_DISCONNECT_TIMEOUT),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Knobs of the recovery chain. Defaults reproduce the fixed policy.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub max_timeout_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Automatic argument corrections allowed per original request.
    pub max_parameter_corrections: u32,
    /// Thread id used when a call omits it and no stop has been observed.
    pub default_thread_id: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(1000),
            max_timeout_retries: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(10_000),
            max_parameter_corrections: 1,
            default_thread_id: 1,
        }
    }
}

/// How to reach a debug adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Spawn the adapter and speak DAP over its stdin/stdout.
    Spawn {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Connect to an adapter already listening on a socket.
    Tcp { host: String, port: u16 },
}

impl TransportConfig {
    pub fn spawn(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Spawn {
            command: command.into(),
            args,
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Spawn { command, args, .. } if args.is_empty() => command.clone(),
            Self::Spawn { command, args, .. } => format!("{} {}", command, args.join(" ")),
            Self::Tcp { host, port } => format!("{host}:{port}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    #[default]
    Launch,
    Attach,
}

impl HandshakeMode {
    pub fn command(&self) -> &'static str {
        match self {
            HandshakeMode::Launch => "launch",
            HandshakeMode::Attach => "attach",
        }
    }
}

/// Lines to break on before the debuggee is released by `configurationDone`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialBreakpoints {
    pub source_path: String,
    pub lines: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default)]
    pub mode: HandshakeMode,
    #[serde(default = "default_adapter_id")]
    pub adapter_id: String,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub breakpoints: Vec<InitialBreakpoints>,
    /// Adapter-specific launch/attach keys merged into the request verbatim.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

fn default_adapter_id() -> String {
    "dap-bridge".to_string()
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            mode: HandshakeMode::Launch,
            adapter_id: default_adapter_id(),
            program: None,
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            pid: None,
            stop_on_entry: false,
            breakpoints: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Everything needed to open one debug session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Caller-chosen id; a fresh UUID is allocated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub transport: TransportConfig,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub handshake: HandshakeConfig,
}

impl SessionConfig {
    pub fn new(transport: TransportConfig, handshake: HandshakeConfig) -> Self {
        Self {
            session_id: None,
            transport,
            request_timeout_ms: None,
            handshake,
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(5));
        assert_eq!(config.recovery.max_parameter_corrections, 1);
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = BridgeConfig::from_lookup(|_| None);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_custom() {
        let config = BridgeConfig::from_lookup(|key| match key {
            "DAP_BRIDGE_REQUEST_TIMEOUT_MS" => Some("5000".to_string()),
            "DAP_BRIDGE_HANDSHAKE_TIMEOUT_MS" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_session_config_deserializes_spawn_transport() {
        let config: SessionConfig = serde_json::from_value(json!({
            "transport": { "kind": "spawn", "command": "codelldb", "args": ["--port", "0"] },
            "request_timeout_ms": 2500,
            "handshake": { "mode": "attach", "pid": 4242 }
        }))
        .expect("config should parse");

        assert_eq!(
            config.transport,
            TransportConfig::spawn("codelldb", vec!["--port".into(), "0".into()])
        );
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.handshake.mode, HandshakeMode::Attach);
        assert_eq!(config.handshake.adapter_id, "dap-bridge");
        assert_eq!(config.handshake.pid, Some(4242));
    }

    #[test]
    fn test_transport_describe() {
        assert_eq!(TransportConfig::tcp("127.0.0.1", 5678).describe(), "127.0.0.1:5678");
        assert_eq!(
            TransportConfig::spawn("python", vec!["-m".into(), "debugpy.adapter".into()]).describe(),
            "python -m debugpy.adapter"
        );
    }
}
