//! Typed payloads on both sides of the bridge.

pub mod events;
pub mod responses;
pub mod tools;

pub use events::{AdapterEvent, Notification};
pub use responses::AdapterBody;
pub use tools::{
    SourceBreakpoint, StepKind, TextContent, ToolCall, ToolCallRequest, ToolCallResult, ToolName,
    ToolOutput,
};
