//! Prioritized error recovery for tool calls.
//!
//! Strategies are sorted once, highest priority first; the first one whose
//! predicate accepts `(error, context)` decides what happens next.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::mapping::timestamp_millis;
use crate::session::SessionManager;
use crate::types::ToolOutput;
use crate::{BridgeError, ErrorKind};

pub const RECONNECT_PRIORITY: u32 = 100;
pub const TIMEOUT_RETRY_PRIORITY: u32 = 80;
pub const PARAMETER_CORRECTION_PRIORITY: u32 = 60;
pub const DEGRADATION_PRIORITY: u32 = 40;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub request_id: String,
    pub session_id: Option<String>,
    pub tool_name: String,
    pub retry_count: u32,
    pub original_arguments: Value,
    pub timestamp: u64,
}

impl ErrorContext {
    pub fn new(request_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            tool_name: tool_name.into(),
            retry_count: 0,
            original_arguments: arguments,
            timestamp: timestamp_millis(),
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Run the call again after `delay`, with corrected arguments when given.
    Retry {
        delay: Duration,
        arguments: Option<Value>,
    },
    /// Answer the caller with this result instead of an error.
    Fallback(ToolOutput),
    Surface(BridgeError),
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32;
    fn applies(&self, error: &BridgeError, context: &ErrorContext) -> bool;
    async fn recover(&self, error: &BridgeError, context: &ErrorContext) -> RecoveryOutcome;
}

/// Rebuilds a session whose adapter connection dropped.
pub struct SessionReconnection {
    sessions: Arc<SessionManager>,
    max_attempts: u32,
    delay: Duration,
}

#[async_trait]
impl RecoveryStrategy for SessionReconnection {
    fn name(&self) -> &'static str {
        "session_reconnection"
    }

    fn priority(&self) -> u32 {
        RECONNECT_PRIORITY
    }

    fn applies(&self, error: &BridgeError, context: &ErrorContext) -> bool {
        matches!(error.kind(), ErrorKind::Adapter | ErrorKind::Connection)
            && error.indicates_dropped_connection()
            && context.retry_count < self.max_attempts
            && context.session_id.is_some()
    }

    async fn recover(&self, error: &BridgeError, context: &ErrorContext) -> RecoveryOutcome {
        let Some(session_id) = context.session_id.as_deref() else {
            return RecoveryOutcome::Surface(error.clone());
        };
        match self.sessions.restore_connection(session_id).await {
            Ok(_) => RecoveryOutcome::Retry {
                delay: self.delay,
                arguments: None,
            },
            Err(e) => {
                warn!(session_id, "Reconnection failed: {}", e);
                RecoveryOutcome::Surface(error.clone())
            }
        }
    }
}

pub struct TimeoutRetry {
    max_retries: u32,
    base: Duration,
    cap: Duration,
}

impl TimeoutRetry {
    /// `min(base * 2^retry, cap)`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry_count);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

#[async_trait]
impl RecoveryStrategy for TimeoutRetry {
    fn name(&self) -> &'static str {
        "timeout_retry"
    }

    fn priority(&self) -> u32 {
        TIMEOUT_RETRY_PRIORITY
    }

    fn applies(&self, error: &BridgeError, context: &ErrorContext) -> bool {
        error.kind() == ErrorKind::Timeout && context.retry_count < self.max_retries
    }

    async fn recover(&self, _error: &BridgeError, context: &ErrorContext) -> RecoveryOutcome {
        RecoveryOutcome::Retry {
            delay: self.backoff_delay(context.retry_count),
            arguments: None,
        }
    }
}

/// Fills in a missing session or thread id and retries.
pub struct ParameterCorrection {
    sessions: Arc<SessionManager>,
    max_corrections: u32,
    default_thread_id: i64,
}

const CORRECTABLE_FIELDS: [&str; 2] = ["sessionId", "threadId"];

#[async_trait]
impl RecoveryStrategy for ParameterCorrection {
    fn name(&self) -> &'static str {
        "parameter_correction"
    }

    fn priority(&self) -> u32 {
        PARAMETER_CORRECTION_PRIORITY
    }

    fn applies(&self, error: &BridgeError, context: &ErrorContext) -> bool {
        error.kind() == ErrorKind::Validation
            && context.retry_count < self.max_corrections
            && error
                .invalid_field()
                .is_some_and(|field| CORRECTABLE_FIELDS.contains(&field))
    }

    async fn recover(&self, error: &BridgeError, context: &ErrorContext) -> RecoveryOutcome {
        let mut arguments = match &context.original_arguments {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };

        match error.invalid_field() {
            Some("sessionId") => {
                let session_id = match &context.session_id {
                    Some(id) => Some(id.clone()),
                    None => self
                        .sessions
                        .most_recent_session()
                        .await
                        .map(|s| s.id().to_string()),
                };
                let Some(session_id) = session_id else {
                    return RecoveryOutcome::Surface(error.clone());
                };
                arguments.insert("sessionId".into(), json!(session_id));
            }
            Some("threadId") => {
                let stopped = match context.session_id.as_deref() {
                    Some(id) => match self.sessions.get_session(id).await {
                        Ok(session) => session.last_stopped_thread().await,
                        Err(_) => None,
                    },
                    None => None,
                };
                arguments.insert("threadId".into(), json!(stopped.unwrap_or(self.default_thread_id)));
            }
            _ => return RecoveryOutcome::Surface(error.clone()),
        }

        RecoveryOutcome::Retry {
            delay: Duration::ZERO,
            arguments: Some(Value::Object(arguments)),
        }
    }
}

pub struct GracefulDegradation;

#[async_trait]
impl RecoveryStrategy for GracefulDegradation {
    fn name(&self) -> &'static str {
        "graceful_degradation"
    }

    fn priority(&self) -> u32 {
        DEGRADATION_PRIORITY
    }

    fn applies(&self, error: &BridgeError, _context: &ErrorContext) -> bool {
        error.kind() == ErrorKind::Unsupported
    }

    async fn recover(&self, error: &BridgeError, context: &ErrorContext) -> RecoveryOutcome {
        RecoveryOutcome::Fallback(ToolOutput::text(format!(
            "'{}' is not available here ({}). The debug session was left unchanged.",
            context.tool_name, error
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub message: String,
    pub tool_name: String,
    pub session_id: Option<String>,
    pub retry_count: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub total: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub by_tool: BTreeMap<String, u64>,
    pub last_error: Option<RecordedError>,
}

pub struct ErrorRecovery {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
    stats: Mutex<RecoveryStats>,
}

impl ErrorRecovery {
    /// The standard chain: reconnect, timeout retry, parameter correction,
    /// degradation.
    pub fn new(config: &RecoveryConfig, sessions: Arc<SessionManager>) -> Self {
        Self::with_strategies(vec![
            Box::new(SessionReconnection {
                sessions: sessions.clone(),
                max_attempts: config.max_reconnect_attempts,
                delay: config.reconnect_delay,
            }),
            Box::new(TimeoutRetry {
                max_retries: config.max_timeout_retries,
                base: config.backoff_base,
                cap: config.backoff_cap,
            }),
            Box::new(ParameterCorrection {
                sessions,
                max_corrections: config.max_parameter_corrections,
                default_thread_id: config.default_thread_id,
            }),
            Box::new(GracefulDegradation),
        ])
    }

    pub fn with_strategies(mut strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        strategies.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        Self {
            strategies,
            stats: Mutex::new(RecoveryStats::default()),
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn select(&self, error: &BridgeError, context: &ErrorContext) -> Option<&dyn RecoveryStrategy> {
        self.strategies
            .iter()
            .find(|s| s.applies(error, context))
            .map(|s| s.as_ref())
    }

    /// Record `error` and let the first applicable strategy decide.
    pub async fn handle(&self, error: BridgeError, context: &ErrorContext) -> RecoveryOutcome {
        self.record(&error, context);

        match self.select(&error, context) {
            Some(strategy) => {
                info!(
                    strategy = strategy.name(),
                    tool = %context.tool_name,
                    retry = context.retry_count,
                    "Recovering from {} error: {}",
                    error.kind(),
                    error
                );
                strategy.recover(&error, context).await
            }
            None => RecoveryOutcome::Surface(error),
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = RecoveryStats::default();
    }

    fn record(&self, error: &BridgeError, context: &ErrorContext) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.total += 1;
        *stats.by_kind.entry(error.kind()).or_default() += 1;
        *stats.by_tool.entry(context.tool_name.clone()).or_default() += 1;
        stats.last_error = Some(RecordedError {
            kind: error.kind(),
            message: error.to_string(),
            tool_name: context.tool_name.clone(),
            session_id: context.session_id.clone(),
            retry_count: context.retry_count,
            timestamp: timestamp_millis(),
        });
    }
}
