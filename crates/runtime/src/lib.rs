//! Steward runtime: model protocol, tools, and the session orchestrator.
//!
//! # Overview
//!
//! - **Backend**: a trait abstracting LLM providers, with a non-streaming
//!   `call` and a `stream` derived from it by default.
//! - **ToolRegistry**: built-in tools grouped by category plus tools
//!   discovered from MCP servers grouped by source.
//! - **Orchestrator**: runs one generation session at a time, with
//!   cooperative cancellation, single-shot tool-call repair and a step
//!   budget.
//!
//! # Example
//!
//! ```ignore
//! use runtime::{AnthropicAuth, AnthropicBackend, Message, ModelHandle, Orchestrator};
//! use std::collections::BTreeMap;
//! use storage::SessionId;
//!
//! # async fn example() -> runtime::Result<()> {
//! let auth = AnthropicAuth::ApiKey("sk-ant-api01-...".into());
//! let model = "claude-sonnet-4-20250514";
//! let backend = AnthropicBackend::new(auth, model);
//! let handle = ModelHandle::new("anthropic", model, backend);
//!
//! let orchestrator = Orchestrator::default();
//! let mut session = orchestrator
//!     .start_session(SessionId::new(), handle, vec![Message::user("Hello!")], "", BTreeMap::new())
//!     .await?;
//! while let Some(event) = session.next_event().await {
//!     println!("{event:?}");
//! }
//! let end = session.wait().await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use model::{
    Backend, Message, ModelError, ModelHandle, ModelRequest, ModelResponse, Part, Role,
    StreamEvent, ToolCall, ToolResult, ToolSpec, Usage,
};
pub use orchestrator::{
    DEFAULT_MAX_STEPS, Orchestrator, OrchestratorConfig, SessionEnd, SessionEvent, SessionHandle,
    SessionSummary,
};
pub use providers::{AnthropicAuth, AnthropicBackend};
pub use tools::{ToolDescriptor, ToolError, ToolOutcome, ToolRegistry};
