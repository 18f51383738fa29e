//! Tool catalogue, validation, built-ins and MCP discovery.

pub mod builtin;
pub mod errors;
pub mod mcp;
mod registry;
mod types;
mod validate;

pub use errors::ToolError;
pub use mcp::{McpClient, McpError, McpServerConfig};
pub use registry::ToolRegistry;
pub use types::{ToolDescriptor, ToolFuture, ToolOutcome};
pub use validate::validate_input;
