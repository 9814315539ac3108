use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Source {
    pub fn label(&self) -> Option<&str> {
        self.path.as_deref().or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    #[serde(default)]
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    #[serde(default)]
    pub id: Option<i64>,
    pub verified: bool,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    pub result: String,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

#[derive(Debug, Deserialize)]
struct ThreadsBody {
    threads: Vec<Thread>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackTraceBody {
    stack_frames: Vec<StackFrame>,
    #[serde(default)]
    total_frames: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ScopesBody {
    scopes: Vec<Scope>,
}

#[derive(Debug, Deserialize)]
struct VariablesBody {
    variables: Vec<Variable>,
}

#[derive(Debug, Deserialize)]
struct BreakpointsBody {
    breakpoints: Vec<Breakpoint>,
}

/// Success body of an adapter response, typed for the commands the bridge
/// renders and raw for everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterBody {
    Threads(Vec<Thread>),
    StackTrace {
        frames: Vec<StackFrame>,
        total: Option<i64>,
    },
    Scopes(Vec<Scope>),
    Variables(Vec<Variable>),
    Evaluate(EvaluateBody),
    SetBreakpoints {
        breakpoints: Vec<Breakpoint>,
        raw: Vec<Value>,
    },
    Other(Option<Value>),
}

impl AdapterBody {
    /// Bodies that don't match the expected shape fall back to `Other`.
    pub fn parse(command: &str, body: Option<&Value>) -> Self {
        let Some(value) = body else {
            return AdapterBody::Other(None);
        };
        let typed = match command {
            "threads" => from_value::<ThreadsBody>(value).map(|b| AdapterBody::Threads(b.threads)),
            "stackTrace" => from_value::<StackTraceBody>(value).map(|b| AdapterBody::StackTrace {
                frames: b.stack_frames,
                total: b.total_frames,
            }),
            "scopes" => from_value::<ScopesBody>(value).map(|b| AdapterBody::Scopes(b.scopes)),
            "variables" => from_value::<VariablesBody>(value).map(|b| AdapterBody::Variables(b.variables)),
            "evaluate" => from_value::<EvaluateBody>(value).map(AdapterBody::Evaluate),
            "setBreakpoints" => from_value::<BreakpointsBody>(value).map(|b| AdapterBody::SetBreakpoints {
                breakpoints: b.breakpoints,
                raw: value
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            }),
            _ => None,
        };
        typed.unwrap_or_else(|| AdapterBody::Other(Some(value.clone())))
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stack_trace() {
        let body = json!({
            "stackFrames": [
                {"id": 1000, "name": "main", "line": 12, "column": 1, "source": {"path": "/src/main.rs"}}
            ],
            "totalFrames": 1
        });
        match AdapterBody::parse("stackTrace", Some(&body)) {
            AdapterBody::StackTrace { frames, total } => {
                assert_eq!(frames[0].name, "main");
                assert_eq!(frames[0].source.as_ref().and_then(Source::label), Some("/src/main.rs"));
                assert_eq!(total, Some(1));
            }
            other => panic!("Expected stack trace, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_variable_type_field() {
        let body = json!({"variables": [{"name": "x", "value": "1", "type": "int", "variablesReference": 0}]});
        match AdapterBody::parse("variables", Some(&body)) {
            AdapterBody::Variables(vars) => assert_eq!(vars[0].type_name.as_deref(), Some("int")),
            other => panic!("Expected variables, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_shape_falls_back_to_other() {
        let body = json!({"threads": "not-a-list"});
        assert_eq!(
            AdapterBody::parse("threads", Some(&body)),
            AdapterBody::Other(Some(body.clone()))
        );
        assert_eq!(AdapterBody::parse("continue", None), AdapterBody::Other(None));
    }
}
