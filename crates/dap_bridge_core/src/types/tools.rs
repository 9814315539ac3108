use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-facing tool invocation envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub result: ToolOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: Vec<TextContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent::new(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent::new(text)],
            is_error: true,
        }
    }

    pub fn with_block(mut self, text: impl Into<String>) -> Self {
        self.content.push(TextContent::new(text));
        self
    }

    /// All text blocks joined with newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Tools the command mapper knows how to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    Continue,
    Pause,
    StepOver,
    StepIn,
    StepOut,
    SetBreakpoints,
    GetThreads,
    GetStackTrace,
    GetScopes,
    GetVariables,
    Evaluate,
    Terminate,
    AdapterRequest,
}

impl ToolName {
    pub const ALL: [ToolName; 13] = [
        ToolName::Continue,
        ToolName::Pause,
        ToolName::StepOver,
        ToolName::StepIn,
        ToolName::StepOut,
        ToolName::SetBreakpoints,
        ToolName::GetThreads,
        ToolName::GetStackTrace,
        ToolName::GetScopes,
        ToolName::GetVariables,
        ToolName::Evaluate,
        ToolName::Terminate,
        ToolName::AdapterRequest,
    ];

    /// Accepts `step_over`, `step-over`, `stepOver`, `debugger_step_over` and
    /// `debug-step-over` alike.
    pub fn parse(method: &str) -> Option<Self> {
        let normalized = normalize(method);
        let name = normalized
            .strip_prefix("debugger_")
            .or_else(|| normalized.strip_prefix("debug_"))
            .unwrap_or(&normalized);

        let tool = match name {
            "continue" => ToolName::Continue,
            "pause" => ToolName::Pause,
            "step_over" | "next" => ToolName::StepOver,
            "step_in" | "step_into" => ToolName::StepIn,
            "step_out" => ToolName::StepOut,
            "set_breakpoints" => ToolName::SetBreakpoints,
            "get_threads" | "threads" => ToolName::GetThreads,
            "get_stack_trace" | "stack_trace" => ToolName::GetStackTrace,
            "get_scopes" | "scopes" => ToolName::GetScopes,
            "get_variables" | "variables" => ToolName::GetVariables,
            "evaluate" => ToolName::Evaluate,
            "terminate" => ToolName::Terminate,
            "adapter_request" => ToolName::AdapterRequest,
            _ => return None,
        };
        Some(tool)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Continue => "continue",
            ToolName::Pause => "pause",
            ToolName::StepOver => "step_over",
            ToolName::StepIn => "step_in",
            ToolName::StepOut => "step_out",
            ToolName::SetBreakpoints => "set_breakpoints",
            ToolName::GetThreads => "get_threads",
            ToolName::GetStackTrace => "get_stack_trace",
            ToolName::GetScopes => "get_scopes",
            ToolName::GetVariables => "get_variables",
            ToolName::Evaluate => "evaluate",
            ToolName::Terminate => "terminate",
            ToolName::AdapterRequest => "adapter_request",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(method: &str) -> String {
    let mut out = String::with_capacity(method.len() + 4);
    for (i, ch) in method.trim().chars().enumerate() {
        match ch {
            '-' | '.' | '/' | ' ' => out.push('_'),
            c if c.is_ascii_uppercase() => {
                if i > 0 && !out.ends_with('_') {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            }
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    In,
    Out,
}

impl StepKind {
    pub fn command(&self) -> &'static str {
        match self {
            StepKind::Over => "next",
            StepKind::In => "stepIn",
            StepKind::Out => "stepOut",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

impl SourceBreakpoint {
    pub fn at_line(line: i64) -> Self {
        Self {
            line,
            column: None,
            condition: None,
            hit_condition: None,
            log_message: None,
        }
    }
}

/// A validated tool call, one variant per tool plus a raw passthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Continue {
        thread_id: i64,
    },
    Pause {
        thread_id: i64,
    },
    Step {
        kind: StepKind,
        thread_id: i64,
        granularity: String,
        target_id: Option<i64>,
    },
    SetBreakpoints {
        source_path: String,
        breakpoints: Vec<SourceBreakpoint>,
    },
    GetThreads,
    GetStackTrace {
        thread_id: i64,
        start_frame: Option<i64>,
        levels: Option<i64>,
    },
    GetScopes {
        frame_id: i64,
    },
    GetVariables {
        variables_reference: i64,
        filter: Option<String>,
        start: Option<i64>,
        count: Option<i64>,
    },
    Evaluate {
        expression: String,
        frame_id: Option<i64>,
        context: String,
    },
    Terminate {
        restart: bool,
    },
    Passthrough {
        command: String,
        arguments: Option<Value>,
    },
}
