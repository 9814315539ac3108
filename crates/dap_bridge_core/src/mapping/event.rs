use serde_json::{json, Map, Value};

use super::timestamp_millis;
use crate::protocol::Event;
use crate::transport::ExitInfo;
use crate::types::{AdapterEvent, Notification};

const GENERIC_METHOD: &str = "debugger/event";

/// Adapter event → notification. Every event yields exactly one notification.
pub struct EventMapper;

impl EventMapper {
    pub fn map(session_id: &str, event: &Event) -> Notification {
        Self::map_at(session_id, event, timestamp_millis())
    }

    pub fn map_at(session_id: &str, event: &Event, timestamp: u64) -> Notification {
        let mut params = Map::new();
        params.insert("sessionId".into(), json!(session_id));

        let method = match AdapterEvent::parse(event) {
            AdapterEvent::Stopped(stopped) => {
                params.insert("reason".into(), json!(stopped.reason));
                params.insert("threadId".into(), json!(stopped.thread_id));
                params.insert("allThreadsStopped".into(), json!(stopped.all_threads_stopped.unwrap_or(false)));
                if let Some(description) = stopped.description {
                    params.insert("description".into(), json!(description));
                }
                if let Some(text) = stopped.text {
                    params.insert("text".into(), json!(text));
                }
                if !stopped.hit_breakpoint_ids.is_empty() {
                    params.insert("hitBreakpointIds".into(), json!(stopped.hit_breakpoint_ids));
                }
                "debugger/stopped"
            }
            AdapterEvent::Output(output) => {
                params.insert("category".into(), json!(output.category.unwrap_or_else(|| "console".into())));
                params.insert("output".into(), json!(output.output));
                "debugger/output"
            }
            AdapterEvent::Thread(thread) => {
                params.insert("threadId".into(), json!(thread.thread_id));
                params.insert("reason".into(), json!(thread.reason));
                match thread.reason.as_str() {
                    "started" => "debugger/threadStarted",
                    "exited" => "debugger/threadExited",
                    _ => "debugger/thread",
                }
            }
            AdapterEvent::Breakpoint(changed) => {
                params.insert("reason".into(), json!(changed.reason));
                params.insert("breakpoint".into(), json!(changed.breakpoint));
                "debugger/breakpointChanged"
            }
            AdapterEvent::Terminated { restart } => {
                if let Some(restart) = restart {
                    params.insert("restart".into(), restart);
                }
                "debugger/terminated"
            }
            AdapterEvent::Exited(exited) => {
                params.insert("exitCode".into(), json!(exited.exit_code));
                "debugger/exited"
            }
            AdapterEvent::Continued(continued) => {
                params.insert("threadId".into(), json!(continued.thread_id));
                params.insert(
                    "allThreadsContinued".into(),
                    json!(continued.all_threads_continued.unwrap_or(true)),
                );
                "debugger/continued"
            }
            AdapterEvent::Initialized => "debugger/initialized",
            AdapterEvent::Capabilities(capabilities) => {
                params.insert("capabilities".into(), Value::Object(capabilities));
                "debugger/capabilities"
            }
            AdapterEvent::Unknown { event, body } => {
                params.insert("event".into(), json!(event));
                params.insert("body".into(), body.unwrap_or(Value::Null));
                GENERIC_METHOD
            }
        };

        params.insert("timestamp".into(), json!(timestamp));
        Notification {
            method: method.to_string(),
            params: Value::Object(params),
        }
    }

    /// Emitted when a session's adapter connection drops without a
    /// `terminated` or `exited` event.
    pub fn connection_lost(session_id: &str, exit: ExitInfo) -> Notification {
        Notification {
            method: "debugger/connectionLost".to_string(),
            params: json!({
                "sessionId": session_id,
                "exitCode": exit.code,
                "signal": exit.signal,
                "timestamp": timestamp_millis(),
            }),
        }
    }
}
