use serde_json::{json, Map, Value};

use crate::types::{SourceBreakpoint, StepKind, ToolCall, ToolName};
use crate::{BridgeError, Result};

const DEFAULT_GRANULARITY: &str = "line";
const DEFAULT_EVALUATE_CONTEXT: &str = "repl";
const GRANULARITIES: [&str; 3] = ["statement", "line", "instruction"];

/// Tool call → adapter request.
pub struct CommandMapper;

impl CommandMapper {
    /// Validate `arguments` for `tool` and build the typed call.
    pub fn map(tool: ToolName, arguments: &Value) -> Result<ToolCall> {
        let args = Args(arguments);
        let call = match tool {
            ToolName::Continue => ToolCall::Continue {
                thread_id: args.thread_id()?,
            },
            ToolName::Pause => ToolCall::Pause {
                thread_id: args.thread_id()?,
            },
            ToolName::StepOver => step(&args, StepKind::Over)?,
            ToolName::StepIn => step(&args, StepKind::In)?,
            ToolName::StepOut => step(&args, StepKind::Out)?,
            ToolName::SetBreakpoints => ToolCall::SetBreakpoints {
                source_path: args.source_path()?,
                breakpoints: args.breakpoints()?,
            },
            ToolName::GetThreads => ToolCall::GetThreads,
            ToolName::GetStackTrace => ToolCall::GetStackTrace {
                thread_id: args.thread_id()?,
                start_frame: args.int("startFrame", "start_frame")?,
                levels: args.int("levels", "levels")?,
            },
            ToolName::GetScopes => ToolCall::GetScopes {
                frame_id: args
                    .int("frameId", "frame_id")?
                    .ok_or_else(|| BridgeError::validation("frameId", "frame identifier is required"))?,
            },
            ToolName::GetVariables => ToolCall::GetVariables {
                variables_reference: args
                    .int("variablesReference", "variables_reference")?
                    .ok_or_else(|| {
                        BridgeError::validation("variablesReference", "variables reference is required")
                    })?,
                filter: args.string("filter", "filter")?,
                start: args.int("start", "start")?,
                count: args.int("count", "count")?,
            },
            ToolName::Evaluate => ToolCall::Evaluate {
                expression: args
                    .string("expression", "expression")?
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| {
                        BridgeError::validation("expression", "a non-empty expression is required")
                    })?,
                frame_id: args.int("frameId", "frame_id")?,
                context: args
                    .string("context", "context")?
                    .unwrap_or_else(|| DEFAULT_EVALUATE_CONTEXT.to_string()),
            },
            ToolName::Terminate => ToolCall::Terminate {
                restart: args.bool("restart", "restart")?.unwrap_or(false),
            },
            ToolName::AdapterRequest => ToolCall::Passthrough {
                command: args
                    .string("command", "command")?
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| BridgeError::validation("command", "an adapter command is required"))?,
                arguments: args.get("arguments", "arguments").filter(|v| !v.is_null()).cloned(),
            },
        };
        Ok(call)
    }

    /// The `sessionId` every tool call must carry.
    pub fn session_id(arguments: &Value) -> Result<String> {
        Args(arguments)
            .string("sessionId", "session_id")?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BridgeError::validation("sessionId", "session identifier is required"))
    }
}

impl ToolCall {
    /// Adapter command name after protocol renames.
    pub fn command(&self) -> &str {
        match self {
            ToolCall::Continue { .. } => "continue",
            ToolCall::Pause { .. } => "pause",
            ToolCall::Step { kind, .. } => kind.command(),
            ToolCall::SetBreakpoints { .. } => "setBreakpoints",
            ToolCall::GetThreads => "threads",
            ToolCall::GetStackTrace { .. } => "stackTrace",
            ToolCall::GetScopes { .. } => "scopes",
            ToolCall::GetVariables { .. } => "variables",
            ToolCall::Evaluate { .. } => "evaluate",
            ToolCall::Terminate { .. } => "terminate",
            ToolCall::Passthrough { command, .. } => command,
        }
    }

    /// Adapter request arguments.
    pub fn arguments(&self) -> Option<Value> {
        let mut args = Map::new();
        match self {
            ToolCall::Continue { thread_id } | ToolCall::Pause { thread_id } => {
                args.insert("threadId".into(), json!(thread_id));
            }
            ToolCall::Step {
                thread_id,
                granularity,
                target_id,
                ..
            } => {
                args.insert("threadId".into(), json!(thread_id));
                args.insert("granularity".into(), json!(granularity));
                insert_opt(&mut args, "targetId", target_id);
            }
            ToolCall::SetBreakpoints {
                source_path,
                breakpoints,
            } => {
                let lines: Vec<i64> = breakpoints.iter().map(|bp| bp.line).collect();
                args.insert("source".into(), source_json(source_path));
                args.insert("breakpoints".into(), json!(breakpoints));
                args.insert("lines".into(), json!(lines));
            }
            ToolCall::GetThreads => return None,
            ToolCall::GetStackTrace {
                thread_id,
                start_frame,
                levels,
            } => {
                args.insert("threadId".into(), json!(thread_id));
                insert_opt(&mut args, "startFrame", start_frame);
                insert_opt(&mut args, "levels", levels);
            }
            ToolCall::GetScopes { frame_id } => {
                args.insert("frameId".into(), json!(frame_id));
            }
            ToolCall::GetVariables {
                variables_reference,
                filter,
                start,
                count,
            } => {
                args.insert("variablesReference".into(), json!(variables_reference));
                if let Some(filter) = filter {
                    args.insert("filter".into(), json!(filter));
                }
                insert_opt(&mut args, "start", start);
                insert_opt(&mut args, "count", count);
            }
            ToolCall::Evaluate {
                expression,
                frame_id,
                context,
            } => {
                args.insert("expression".into(), json!(expression));
                insert_opt(&mut args, "frameId", frame_id);
                args.insert("context".into(), json!(context));
            }
            ToolCall::Terminate { restart } => {
                args.insert("restart".into(), json!(restart));
            }
            ToolCall::Passthrough { arguments, .. } => return arguments.clone(),
        }
        Some(Value::Object(args))
    }

    /// Thread the call acts on, if any.
    pub fn thread_id(&self) -> Option<i64> {
        match self {
            ToolCall::Continue { thread_id }
            | ToolCall::Pause { thread_id }
            | ToolCall::Step { thread_id, .. }
            | ToolCall::GetStackTrace { thread_id, .. } => Some(*thread_id),
            _ => None,
        }
    }
}

fn step(args: &Args<'_>, kind: StepKind) -> Result<ToolCall> {
    let thread_id = args.thread_id()?;
    let granularity = args
        .string("granularity", "granularity")?
        .unwrap_or_else(|| DEFAULT_GRANULARITY.to_string());
    if !GRANULARITIES.contains(&granularity.as_str()) {
        return Err(BridgeError::validation(
            "granularity",
            format!("expected one of {}", GRANULARITIES.join(", ")),
        ));
    }
    Ok(ToolCall::Step {
        kind,
        thread_id,
        granularity,
        target_id: args.int("targetId", "target_id")?,
    })
}

fn insert_opt(args: &mut Map<String, Value>, key: &str, value: &Option<i64>) {
    if let Some(value) = value {
        args.insert(key.to_string(), json!(value));
    }
}

fn source_json(path: &str) -> Value {
    let name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    json!({ "path": path, "name": name })
}

/// Argument lookups that accept both camelCase and snake_case keys.
struct Args<'a>(&'a Value);

impl<'a> Args<'a> {
    fn get(&self, camel: &str, snake: &str) -> Option<&'a Value> {
        self.0
            .get(camel)
            .or_else(|| self.0.get(snake))
            .filter(|v| !v.is_null())
    }

    fn int(&self, camel: &str, snake: &str) -> Result<Option<i64>> {
        match self.get(camel, snake) {
            None => Ok(None),
            Some(value) => as_int(value)
                .map(Some)
                .ok_or_else(|| BridgeError::validation(camel, "must be an integer")),
        }
    }

    fn string(&self, camel: &str, snake: &str) -> Result<Option<String>> {
        match self.get(camel, snake) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(BridgeError::validation(camel, "must be a string")),
        }
    }

    fn bool(&self, camel: &str, snake: &str) -> Result<Option<bool>> {
        match self.get(camel, snake) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(BridgeError::validation(camel, "must be a boolean")),
        }
    }

    fn thread_id(&self) -> Result<i64> {
        self.int("threadId", "thread_id")?
            .ok_or_else(|| BridgeError::validation("threadId", "thread identifier is required"))
    }

    fn source_path(&self) -> Result<String> {
        let nested = self
            .get("source", "source")
            .and_then(|s| s.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string);
        self.string("sourcePath", "source_path")?
            .or(nested)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| BridgeError::validation("sourcePath", "source path is required"))
    }

    fn breakpoints(&self) -> Result<Vec<SourceBreakpoint>> {
        let entries = self
            .get("breakpoints", "breakpoints")
            .or_else(|| self.get("lines", "lines"))
            .and_then(Value::as_array)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| {
                BridgeError::validation("breakpoints", "at least one breakpoint is required")
            })?;

        entries
            .iter()
            .map(|entry| {
                if let Some(line) = as_int(entry) {
                    return Ok(SourceBreakpoint::at_line(line));
                }
                serde_json::from_value::<SourceBreakpoint>(entry.clone()).map_err(|_| {
                    BridgeError::validation(
                        "breakpoints",
                        "entries must be line numbers or objects with a line",
                    )
                })
            })
            .collect()
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
