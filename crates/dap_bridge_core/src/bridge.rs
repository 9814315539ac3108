//! The bridge context: one per process, created at startup and shut down on
//! exit. Owns the session manager and the recovery chain and dispatches tool
//! calls through the mapping layer.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::adapter::{AdapterConnector, DebugAdapter, WireConnector};
use crate::config::{BridgeConfig, SessionConfig};
use crate::mapping::{CommandMapper, ResponseMapper};
use crate::protocol::Response;
use crate::recovery::{ErrorContext, ErrorRecovery, RecoveryOutcome};
use crate::session::{Session, SessionManager};
use crate::types::responses::Thread;
use crate::types::{AdapterBody, Notification, ToolCall, ToolCallRequest, ToolCallResult, ToolName, ToolOutput};
use crate::{BridgeError, Result};

pub struct Bridge {
    sessions: Arc<SessionManager>,
    recovery: ErrorRecovery,
}

impl Bridge {
    /// Bridge that reaches adapters over spawned processes or TCP.
    pub fn new(config: BridgeConfig) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let connector = Arc::new(WireConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(
        config: BridgeConfig,
        connector: Arc<dyn AdapterConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let recovery_config = config.recovery.clone();
        let (sessions, notifications) = SessionManager::new(config, connector);
        let recovery = ErrorRecovery::new(&recovery_config, sessions.clone());
        (Self { sessions, recovery }, notifications)
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn recovery(&self) -> &ErrorRecovery {
        &self.recovery
    }

    pub async fn create_session(&self, config: SessionConfig) -> Result<Arc<Session>> {
        self.sessions.create_session(config).await
    }

    pub async fn destroy_session(&self, session_id: &str) -> bool {
        self.sessions.destroy_session(session_id).await
    }

    /// Run one tool call, retrying or substituting a result when the recovery
    /// chain says so. Adapter failures come back as error-flagged results.
    #[instrument(skip(self, request), fields(id = %request.id, method = %request.method))]
    pub async fn call_tool(&self, request: ToolCallRequest) -> Result<ToolCallResult> {
        let tool_name = ToolName::parse(&request.method)
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| request.method.clone());
        let mut arguments = match request.arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let mut retry_count = 0;

        loop {
            let error = match self.attempt(&request.method, &arguments).await {
                Ok(output) => return Ok(finish(request.id, output)),
                Err(e) => e,
            };

            let session_id = CommandMapper::session_id(&arguments).ok();
            let context = ErrorContext::new(request.id.clone(), tool_name.clone(), arguments.clone())
                .with_session(session_id)
                .with_retry_count(retry_count);

            match self.recovery.handle(error, &context).await {
                RecoveryOutcome::Retry {
                    delay,
                    arguments: corrected,
                } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if let Some(corrected) = corrected {
                        arguments = corrected;
                    }
                    retry_count += 1;
                    debug!(retry_count, "Retrying tool call");
                }
                RecoveryOutcome::Fallback(output) => return Ok(finish(request.id, output)),
                RecoveryOutcome::Surface(BridgeError::Adapter { message, .. }) => {
                    return Ok(finish(request.id, ResponseMapper::failure(message)));
                }
                RecoveryOutcome::Surface(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, method: &str, arguments: &Value) -> Result<ToolOutput> {
        let tool = ToolName::parse(method)
            .ok_or_else(|| BridgeError::Unsupported(format!("unknown tool '{method}'")))?;
        let session_id = CommandMapper::session_id(arguments)?;
        let call = CommandMapper::map(tool, arguments)?;
        let session = self.sessions.get_session(&session_id).await?;

        if matches!(call, ToolCall::Terminate { .. }) && !session.supports("supportsTerminateRequest").await {
            return Err(BridgeError::Unsupported(format!(
                "the adapter for session '{session_id}' does not support 'terminate'"
            )));
        }

        let response = session.request(call.command(), call.arguments()).await?;
        record_outcome(&session, &call, &response).await;
        Ok(ResponseMapper::map(&response))
    }

    /// Raw request primitive for collaborators that compose their own exchanges.
    pub async fn adapter_request(
        &self,
        session_id: &str,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Response> {
        self.sessions
            .get_session(session_id)
            .await?
            .request(command, arguments)
            .await
    }

    /// The live adapter behind a session.
    pub async fn adapter(&self, session_id: &str) -> Result<Arc<dyn DebugAdapter>> {
        self.sessions
            .get_session(session_id)
            .await?
            .adapter()
            .await
            .ok_or_else(|| BridgeError::Disconnected(format!("session '{session_id}' has no adapter")))
    }

    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}

fn finish(id: String, result: ToolOutput) -> ToolCallResult {
    ToolCallResult { id, result }
}

async fn record_outcome(session: &Session, call: &ToolCall, response: &Response) {
    match call {
        ToolCall::Continue { .. } | ToolCall::Step { .. } => session.mark_resumed().await,
        ToolCall::GetThreads => {
            if let AdapterBody::Threads(threads) = AdapterBody::parse("threads", response.body.as_ref()) {
                let threads: Vec<(i64, String)> = threads
                    .into_iter()
                    .map(|Thread { id, name }| (id, name))
                    .collect();
                session.record_threads(&threads).await;
            }
        }
        ToolCall::SetBreakpoints { source_path, .. } => {
            if let AdapterBody::SetBreakpoints { raw, .. } =
                AdapterBody::parse("setBreakpoints", response.body.as_ref())
            {
                session.record_breakpoints(source_path, raw).await;
            }
        }
        _ => {}
    }
}
