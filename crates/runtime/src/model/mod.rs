//! LLM protocol types and backend trait.

pub mod errors;
pub mod types;

pub use errors::ModelError;
pub use types::{
    Backend, Message, ModelHandle, ModelRequest, ModelResponse, ModelStream, Part, Role,
    StreamEvent, ToolCall, ToolResult, ToolSpec, Usage,
};
