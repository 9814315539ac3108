use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::responses::Breakpoint;
use crate::protocol::Event;

/// Outbound message produced for every adapter event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEvent {
    pub reason: String,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub all_threads_stopped: Option<bool>,
    #[serde(default)]
    pub hit_breakpoint_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputEvent {
    #[serde(default)]
    pub category: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEvent {
    pub reason: String,
    pub thread_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BreakpointEvent {
    pub reason: String,
    pub breakpoint: Breakpoint,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEvent {
    pub exit_code: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEvent {
    pub thread_id: i64,
    #[serde(default)]
    pub all_threads_continued: Option<bool>,
}

/// An adapter event decoded by name. Anything unknown, or known but with a
/// body of the wrong shape, is kept verbatim in `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Stopped(StoppedEvent),
    Output(OutputEvent),
    Thread(ThreadEvent),
    Breakpoint(BreakpointEvent),
    Terminated { restart: Option<Value> },
    Exited(ExitedEvent),
    Continued(ContinuedEvent),
    Initialized,
    Capabilities(Map<String, Value>),
    Unknown { event: String, body: Option<Value> },
}

impl AdapterEvent {
    pub fn parse(event: &Event) -> Self {
        let body = event.body.clone().unwrap_or(Value::Null);
        let parsed = match event.event.as_str() {
            "stopped" => serde_json::from_value(body).ok().map(AdapterEvent::Stopped),
            "output" => serde_json::from_value(body).ok().map(AdapterEvent::Output),
            "thread" => serde_json::from_value(body).ok().map(AdapterEvent::Thread),
            "breakpoint" => serde_json::from_value(body).ok().map(AdapterEvent::Breakpoint),
            "terminated" => Some(AdapterEvent::Terminated {
                restart: body.get("restart").cloned(),
            }),
            "exited" => serde_json::from_value(body).ok().map(AdapterEvent::Exited),
            "continued" => serde_json::from_value(body).ok().map(AdapterEvent::Continued),
            "initialized" => Some(AdapterEvent::Initialized),
            "capabilities" => body
                .get("capabilities")
                .and_then(Value::as_object)
                .cloned()
                .map(AdapterEvent::Capabilities),
            _ => None,
        };
        parsed.unwrap_or_else(|| AdapterEvent::Unknown {
            event: event.event.clone(),
            body: event.body.clone(),
        })
    }

    /// Whether this event ends the debuggee's life.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdapterEvent::Terminated { .. } | AdapterEvent::Exited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stopped() {
        let event = Event::new(5, "stopped").with_body(json!({
            "reason": "breakpoint",
            "threadId": 7,
            "hitBreakpointIds": [1]
        }));
        match AdapterEvent::parse(&event) {
            AdapterEvent::Stopped(stopped) => {
                assert_eq!(stopped.reason, "breakpoint");
                assert_eq!(stopped.thread_id, Some(7));
                assert_eq!(stopped.hit_breakpoint_ids, vec![1]);
            }
            other => panic!("Expected stopped, got {other:?}"),
        }
    }

    #[test]
    fn test_known_name_with_bad_body_is_unknown() {
        let event = Event::new(1, "thread").with_body(json!({"reason": "started"}));
        assert_eq!(
            AdapterEvent::parse(&event),
            AdapterEvent::Unknown {
                event: "thread".into(),
                body: Some(json!({"reason": "started"})),
            }
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(AdapterEvent::parse(&Event::new(1, "terminated")).is_terminal());
        let exited = Event::new(2, "exited").with_body(json!({"exitCode": 0}));
        assert!(AdapterEvent::parse(&exited).is_terminal());
        assert!(!AdapterEvent::parse(&Event::new(3, "initialized")).is_terminal());
    }
}
