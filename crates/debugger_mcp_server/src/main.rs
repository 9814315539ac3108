mod notifications;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dap_bridge_core::{
    config::InitialBreakpoints, types::SourceBreakpoint, Bridge, BridgeConfig, BridgeError, ErrorKind,
    HandshakeConfig, HandshakeMode, SessionConfig, ToolCallRequest, ToolName, ToolOutput, TransportConfig,
};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, transport, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::EnvFilter;

use crate::notifications::{NotificationBuffer, DEFAULT_CAPACITY};

const ADAPTER_PATH_ENV: &str = "DAP_ADAPTER_PATH";
const DEFAULT_TCP_HOST: &str = "127.0.0.1";
const DEFAULT_POLL_LIMIT: usize = 100;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct InitialBreakpointSpec {
    source_path: String,
    lines: Vec<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
struct CreateSessionParams {
    /// Defaults to a generated UUID.
    #[serde(default)]
    session_id: Option<String>,
    /// Adapter executable; falls back to DAP_ADAPTER_PATH.
    #[serde(default)]
    adapter_command: Option<String>,
    #[serde(default)]
    adapter_args: Vec<String>,
    /// Connect over TCP instead of spawning the adapter.
    #[serde(default)]
    tcp_port: Option<u16>,
    #[serde(default)]
    tcp_host: Option<String>,
    #[serde(default)]
    adapter_id: Option<String>,
    /// "launch" (default) or "attach".
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    stop_on_entry: bool,
    #[serde(default)]
    breakpoints: Vec<InitialBreakpointSpec>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    /// Adapter-specific launch/attach arguments.
    #[serde(default)]
    extra: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ThreadParams {
    #[serde(default)]
    session_id: Option<String>,
    /// Defaults to the thread that last stopped, but only when `session_id`
    /// is given. Omitting both is rejected.
    #[serde(default)]
    thread_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StepParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    thread_id: Option<i64>,
    /// statement, line or instruction.
    #[serde(default)]
    granularity: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct BreakpointSpec {
    line: i64,
    #[serde(default)]
    column: Option<i64>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    hit_condition: Option<String>,
    #[serde(default)]
    log_message: Option<String>,
}

impl From<BreakpointSpec> for SourceBreakpoint {
    fn from(spec: BreakpointSpec) -> Self {
        SourceBreakpoint {
            line: spec.line,
            column: spec.column,
            condition: spec.condition,
            hit_condition: spec.hit_condition,
            log_message: spec.log_message,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SetBreakpointsParams {
    #[serde(default)]
    session_id: Option<String>,
    source_path: String,
    breakpoints: Vec<BreakpointSpec>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SessionOnlyParams {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StackTraceParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    thread_id: Option<i64>,
    #[serde(default)]
    start_frame: Option<i64>,
    #[serde(default)]
    levels: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ScopesParams {
    #[serde(default)]
    session_id: Option<String>,
    frame_id: i64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct VariablesParams {
    #[serde(default)]
    session_id: Option<String>,
    variables_reference: i64,
    /// "indexed" or "named".
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    count: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct EvaluateParams {
    #[serde(default)]
    session_id: Option<String>,
    expression: String,
    #[serde(default)]
    frame_id: Option<i64>,
    /// Defaults to "repl".
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct TerminateParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    restart: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct AdapterRequestParams {
    #[serde(default)]
    session_id: Option<String>,
    command: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct PollNotificationsParams {
    /// Return entries with a sequence number above this cursor.
    #[serde(default)]
    since: u64,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Clone)]
struct DebuggerMcpServer {
    tool_router: ToolRouter<Self>,
    bridge: Arc<Bridge>,
    notifications: Arc<Mutex<NotificationBuffer>>,
    next_call_id: Arc<AtomicU64>,
    default_adapter: Option<String>,
}

fn to_mcp_error(err: BridgeError) -> McpError {
    match err.kind() {
        ErrorKind::Validation => McpError::invalid_params(err.to_string(), None),
        _ => McpError::internal_error(err.to_string(), None),
    }
}

fn to_call_tool_result(output: ToolOutput) -> CallToolResult {
    let content = output.content.into_iter().map(|block| Content::text(block.text)).collect();
    if output.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

fn session_config(params: CreateSessionParams, default_adapter: Option<&str>) -> Result<SessionConfig, McpError> {
    let transport = match params.tcp_port {
        Some(port) => TransportConfig::tcp(params.tcp_host.unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()), port),
        None => {
            let command = params
                .adapter_command
                .or_else(|| default_adapter.map(str::to_string))
                .ok_or_else(|| {
                    McpError::invalid_params(
                        format!("Missing debug adapter command. Set {ADAPTER_PATH_ENV} or pass adapter_command."),
                        None,
                    )
                })?;
            TransportConfig::spawn(command, params.adapter_args)
        }
    };

    let mode = match params.mode.as_deref() {
        None | Some("launch") => HandshakeMode::Launch,
        Some("attach") => HandshakeMode::Attach,
        Some(other) => {
            return Err(McpError::invalid_params(
                format!("Unknown mode '{other}'; expected 'launch' or 'attach'"),
                None,
            ))
        }
    };

    let mut handshake = HandshakeConfig {
        mode,
        program: params.program,
        args: params.args,
        cwd: params.cwd,
        pid: params.pid,
        stop_on_entry: params.stop_on_entry,
        breakpoints: params
            .breakpoints
            .into_iter()
            .map(|spec| InitialBreakpoints {
                source_path: spec.source_path,
                lines: spec.lines,
            })
            .collect(),
        extra: params.extra.unwrap_or_default(),
        ..HandshakeConfig::default()
    };
    if let Some(adapter_id) = params.adapter_id {
        handshake.adapter_id = adapter_id;
    }

    let mut config = SessionConfig::new(transport, handshake);
    config.session_id = params.session_id;
    config.request_timeout_ms = params.request_timeout_ms;
    Ok(config)
}

fn tool_arguments<T: Serialize>(params: &T) -> Result<Value, McpError> {
    serde_json::to_value(params).map_err(|e| McpError::internal_error(e.to_string(), None))
}

#[tool_router]
impl DebuggerMcpServer {
    fn new(
        bridge: Arc<Bridge>,
        mut events: mpsc::UnboundedReceiver<dap_bridge_core::Notification>,
        default_adapter: Option<String>,
    ) -> Self {
        let notifications = Arc::new(Mutex::new(NotificationBuffer::new(DEFAULT_CAPACITY)));
        let buffer = notifications.clone();
        tokio::spawn(async move {
            while let Some(notification) = events.recv().await {
                tracing::debug!(method = %notification.method, params = %notification.params, "Adapter notification");
                buffer.lock().await.push(notification);
            }
        });

        Self {
            tool_router: Self::tool_router(),
            bridge,
            notifications,
            next_call_id: Arc::new(AtomicU64::new(1)),
            default_adapter,
        }
    }

    async fn dispatch(&self, tool: ToolName, arguments: Value) -> Result<CallToolResult, McpError> {
        let id = format!("call-{}", self.next_call_id.fetch_add(1, Ordering::Relaxed));
        let result = self
            .bridge
            .call_tool(ToolCallRequest::new(id, tool.as_str(), arguments))
            .await
            .map_err(to_mcp_error)?;
        Ok(to_call_tool_result(result.result))
    }

    #[tool(description = "Start a debug adapter, run the initialize/launch (or attach) handshake and register a session")]
    async fn debugger_create_session(
        &self,
        params: Parameters<CreateSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let config = session_config(params.0, self.default_adapter.as_deref())?;
        let session = self.bridge.create_session(config).await.map_err(to_mcp_error)?;
        let info = session.info().await;
        Ok(CallToolResult::structured(json!({
            "ok": true,
            "session": info,
            "capabilities": session.capabilities().await,
        })))
    }

    #[tool(description = "Disconnect and remove a debug session")]
    async fn debugger_destroy_session(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let destroyed = self.bridge.destroy_session(&params.0.session_id).await;
        Ok(CallToolResult::structured(json!({
            "ok": true,
            "session_id": params.0.session_id,
            "destroyed": destroyed,
        })))
    }

    #[tool(description = "List live debug sessions")]
    async fn debugger_list_sessions(&self) -> Result<CallToolResult, McpError> {
        let sessions = self.bridge.sessions().list_sessions().await;
        Ok(CallToolResult::structured(json!({ "sessions": sessions })))
    }

    #[tool(description = "Continue execution")]
    async fn debugger_continue(&self, params: Parameters<ThreadParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::Continue, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Pause a running thread")]
    async fn debugger_pause(&self, params: Parameters<ThreadParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::Pause, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Step over the next line")]
    async fn debugger_step_over(&self, params: Parameters<StepParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::StepOver, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Step into function call")]
    async fn debugger_step_in(&self, params: Parameters<StepParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::StepIn, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Step out of current function")]
    async fn debugger_step_out(&self, params: Parameters<StepParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::StepOut, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Replace the source breakpoints for a file")]
    async fn debugger_set_breakpoints(
        &self,
        params: Parameters<SetBreakpointsParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let breakpoints: Vec<SourceBreakpoint> = params.breakpoints.into_iter().map(Into::into).collect();
        let mut arguments = json!({
            "source_path": params.source_path,
            "breakpoints": breakpoints,
        });
        if let Some(session_id) = params.session_id {
            arguments["session_id"] = json!(session_id);
        }
        self.dispatch(ToolName::SetBreakpoints, arguments).await
    }

    #[tool(description = "List the debuggee's threads")]
    async fn debugger_threads(&self, params: Parameters<SessionOnlyParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::GetThreads, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Read the call stack of a thread")]
    async fn debugger_stack_trace(
        &self,
        params: Parameters<StackTraceParams>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::GetStackTrace, tool_arguments(&params.0)?).await
    }

    #[tool(description = "List the variable scopes of a stack frame")]
    async fn debugger_scopes(&self, params: Parameters<ScopesParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::GetScopes, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Read variables from a variables reference")]
    async fn debugger_variables(&self, params: Parameters<VariablesParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::GetVariables, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Evaluate expression in debugger context")]
    async fn debugger_evaluate(&self, params: Parameters<EvaluateParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::Evaluate, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Ask the adapter to terminate the debuggee")]
    async fn debugger_terminate(&self, params: Parameters<TerminateParams>) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::Terminate, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Send a raw Debug Adapter Protocol request to a session's adapter")]
    async fn debugger_adapter_request(
        &self,
        params: Parameters<AdapterRequestParams>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(ToolName::AdapterRequest, tool_arguments(&params.0)?).await
    }

    #[tool(description = "Fetch buffered adapter notifications after a sequence cursor")]
    async fn debugger_poll_notifications(
        &self,
        params: Parameters<PollNotificationsParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let buffer = self.notifications.lock().await;
        let entries = buffer.since(
            params.since,
            params.session_id.as_deref(),
            params.limit.unwrap_or(DEFAULT_POLL_LIMIT),
        );
        let cursor = entries.last().map(|e| e.seq).unwrap_or(params.since.max(buffer.latest_seq()));
        Ok(CallToolResult::structured(json!({
            "notifications": entries,
            "cursor": cursor,
            "buffered": buffer.len(),
            "evicted": buffer.evicted(),
        })))
    }

    #[tool(description = "Error counts seen by the recovery chain")]
    async fn debugger_recovery_stats(&self) -> Result<CallToolResult, McpError> {
        let recovery = self.bridge.recovery();
        Ok(CallToolResult::structured(json!({
            "strategies": recovery.strategy_names(),
            "stats": recovery.stats(),
        })))
    }
}

#[tool_handler]
impl ServerHandler for DebuggerMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Debug Adapter Protocol bridge: create sessions, drive execution, inspect state and poll adapter notifications".into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP stream
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let (bridge, notifications) = Bridge::new(BridgeConfig::from_env());
    let bridge = Arc::new(bridge);
    let server = DebuggerMcpServer::new(bridge.clone(), notifications, std::env::var(ADAPTER_PATH_ENV).ok());
    let transport = transport::stdio();

    tracing::info!("Starting Debugger MCP Server on stdio...");

    server.serve(transport).await?.waiting().await?;

    bridge.shutdown().await;
    Ok(())
}
