use std::fmt::Write as _;

use serde_json::Value;

use crate::protocol::Response;
use crate::types::responses::{Breakpoint, EvaluateBody, Scope, StackFrame, Thread, Variable};
use crate::types::{AdapterBody, ToolOutput};

/// Adapter response → tool-call result.
pub struct ResponseMapper;

impl ResponseMapper {
    pub fn map(response: &Response) -> ToolOutput {
        if !response.success {
            return Self::failure(response.error_message());
        }

        match AdapterBody::parse(&response.command, response.body.as_ref()) {
            AdapterBody::Threads(threads) => ToolOutput::text(render_threads(&threads)),
            AdapterBody::StackTrace { frames, total } => ToolOutput::text(render_stack(&frames, total)),
            AdapterBody::Scopes(scopes) => ToolOutput::text(render_scopes(&scopes)),
            AdapterBody::Variables(variables) => ToolOutput::text(render_variables(&variables)),
            AdapterBody::Evaluate(body) => ToolOutput::text(render_evaluate(&body)),
            AdapterBody::SetBreakpoints { breakpoints, raw } => render_breakpoints(&breakpoints, &raw),
            AdapterBody::Other(_) => ToolOutput::text(format!("{} executed successfully", response.command)),
        }
    }

    pub fn failure(message: impl Into<String>) -> ToolOutput {
        ToolOutput::error(message)
    }
}

fn render_threads(threads: &[Thread]) -> String {
    if threads.is_empty() {
        return "No threads".to_string();
    }
    let mut text = format!("Threads ({}):", threads.len());
    for thread in threads {
        let _ = write!(text, "\n  [{}] {}", thread.id, thread.name);
    }
    text
}

fn render_stack(frames: &[StackFrame], total: Option<i64>) -> String {
    if frames.is_empty() {
        return "Stack trace is empty".to_string();
    }
    let mut text = match total {
        Some(total) if total > 0 && total as usize > frames.len() => {
            format!("Stack trace ({} of {} frames):", frames.len(), total)
        }
        _ => format!("Stack trace ({} frames):", frames.len()),
    };
    for (index, frame) in frames.iter().enumerate() {
        let _ = write!(text, "\n  #{index} [{}] {}", frame.id, frame.name);
        if let Some(location) = frame.source.as_ref().and_then(|s| s.label()) {
            let _ = write!(text, " at {}:{}:{}", location, frame.line, frame.column);
        }
    }
    text
}

fn render_scopes(scopes: &[Scope]) -> String {
    if scopes.is_empty() {
        return "No scopes".to_string();
    }
    let mut text = "Scopes:".to_string();
    for scope in scopes {
        let _ = write!(text, "\n  {} (variablesReference {})", scope.name, scope.variables_reference);
        if scope.expensive {
            text.push_str(" [expensive]");
        }
    }
    text
}

fn render_variables(variables: &[Variable]) -> String {
    if variables.is_empty() {
        return "No variables".to_string();
    }
    let mut text = format!("Variables ({}):", variables.len());
    for variable in variables {
        let _ = write!(text, "\n  {}", variable.name);
        if let Some(type_name) = variable.type_name.as_deref().filter(|t| !t.is_empty()) {
            let _ = write!(text, ": {type_name}");
        }
        let _ = write!(text, " = {}", variable.value);
        if variable.variables_reference > 0 {
            let _ = write!(text, " (variablesReference {})", variable.variables_reference);
        }
    }
    text
}

fn render_evaluate(body: &EvaluateBody) -> String {
    let mut text = format!("Result: {}", body.result);
    if let Some(type_name) = body.type_name.as_deref().filter(|t| !t.is_empty()) {
        let _ = write!(text, " ({type_name})");
    }
    if body.variables_reference > 0 {
        let _ = write!(text, " [variablesReference {}]", body.variables_reference);
    }
    text
}

fn render_breakpoints(breakpoints: &[Breakpoint], raw: &[Value]) -> ToolOutput {
    let verified = breakpoints.iter().filter(|bp| bp.verified).count();
    let summary = format!(
        "Set {}/{} breakpoints (verified/total)",
        verified,
        breakpoints.len()
    );
    let detail = serde_json::to_string_pretty(raw).unwrap_or_else(|_| format!("{raw:?}"));
    ToolOutput::text(summary).with_block(detail)
}
