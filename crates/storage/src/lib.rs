//! SQLite-backed event storage for Steward sessions.
//!
//! This crate keeps the audit trail of every generation session: when it
//! started, each message, every tool call and its result, tool-call repairs,
//! and how the session ended.
//!
//! # Core Concepts
//!
//! ## EventStore
//!
//! The [`EventStore`] wraps a SQLite database and provides methods to append
//! events and query session history. It is `Sync`, so the orchestrator's
//! session tasks can share one store.
//!
//! ## Event
//!
//! An [`Event`] represents something that happened during a session. Each event has:
//! - A unique ID
//! - A session ID linking it to a conversation
//! - A timestamp
//! - A kind describing what happened ([`EventKind`])
//!
//! ## EventKind
//!
//! - `SessionStart` / `SessionEnd`: Session lifecycle, with an [`EndStatus`]
//! - `Message`: System, user, assistant or tool messages
//! - `ToolCall` / `ToolResult`: Tool invocations and their results
//! - `ToolRepair`: Malformed arguments sent back to the model
//!
//! # Example
//!
//! ```no_run
//! use storage::{EndStatus, Event, EventKind, EventStore, Role, SessionId};
//!
//! let store = EventStore::open("events.db")?;
//!
//! let session_id = SessionId::new();
//! store.append(&Event::new(session_id, EventKind::SessionStart))?;
//! store.append(&Event::message(session_id, Role::User, "Hello!"))?;
//! store.append(&Event::end(session_id, EndStatus::Finished))?;
//!
//! for summary in store.list_sessions()? {
//!     println!("{}: {} messages", summary.id, summary.message_count);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod store;

pub use error::{Error, Result};
pub use event::{EndStatus, Event, EventKind, Role, SessionId};
pub use store::{EventStore, SessionSummary};
