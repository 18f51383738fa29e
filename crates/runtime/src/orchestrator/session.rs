//! The caller's view of a running session.

use crate::model::{Message, ToolCall, ToolResult, Usage};
use crate::{Error, Result};
use std::sync::{Arc, OnceLock};
use storage::{EndStatus, SessionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Incremental output of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A chunk of assistant text.
    TextDelta(String),
    /// The model asked for a tool.
    ToolCall(ToolCall),
    /// Malformed arguments were sent back to the model once.
    ToolRepair { name: String, repaired: bool },
    /// A tool finished (or failed).
    ToolResult { name: String, result: ToolResult },
    /// One model turn completed.
    StepFinished { step: usize, usage: Usage },
}

/// What a session produced by the time it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Full history, including the assistant and tool messages added.
    pub history: Vec<Message>,
    pub usage: Usage,
    /// Generation turns taken.
    pub steps: usize,
    /// Model round trips, repair requests included.
    pub model_calls: usize,
}

impl SessionSummary {
    /// Text of the last assistant message.
    pub fn reply(&self) -> String {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == storage::Role::Assistant)
            .map(Message::text)
            .unwrap_or_default()
    }
}

/// Terminal state of a session that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// The model stopped asking for tools.
    Finished(SessionSummary),
    /// The step budget ran out while the model still wanted tools.
    StepLimit(SessionSummary),
    /// Cancelled cooperatively; not a failure.
    Cancelled { reason: String },
}

impl SessionEnd {
    pub fn status(&self) -> EndStatus {
        match self {
            Self::Finished(_) => EndStatus::Finished,
            Self::StepLimit(_) => EndStatus::StepLimit,
            Self::Cancelled { .. } => EndStatus::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        match self {
            Self::Finished(summary) | Self::StepLimit(summary) => Some(summary),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Cancellation shared by the orchestrator, the handle and the task.
///
/// The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cancel {
    pub(crate) token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl Cancel {
    pub(crate) fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub(crate) fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| "cancelled".to_string())
    }
}

/// Handle to a running session.
pub struct SessionHandle {
    id: SessionId,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: Cancel,
    task: JoinHandle<Result<SessionEnd>>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        cancel: Cancel,
        task: JoinHandle<Result<SessionEnd>>,
    ) -> Self {
        Self {
            id,
            events,
            cancel,
            task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next incremental event, or `None` once the session has stopped.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Ask the session to stop at its next suspension point.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// Wait for the terminal state.
    pub async fn wait(self) -> Result<SessionEnd> {
        self.task.await.map_err(|e| Error::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
