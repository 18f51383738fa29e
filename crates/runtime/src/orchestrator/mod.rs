//! Stream session orchestrator.
//!
//! Owns at most one in-flight generation. Starting a session cancels the
//! previous one and waits for its cleanup before installing the new one.

mod generation;
mod session;

pub use session::{SessionEnd, SessionEvent, SessionHandle, SessionSummary};

use crate::model::{Backend, Message, ModelHandle, Role};
use crate::tools::ToolDescriptor;
use crate::{Error, Result};
use futures::FutureExt;
use generation::{Generation, Recorder, Stop};
use parking_lot::Mutex;
use session::Cancel;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use storage::{EventKind, EventStore, SessionId};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Default ceiling on model turns per session.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Cancellation reason used when a new session replaces the active one.
pub const SUPERSEDED: &str = "superseded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_steps: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

struct ActiveSession {
    id: SessionId,
    epoch: u64,
    cancel: Cancel,
    done: watch::Receiver<bool>,
}

type Slot = Arc<Mutex<Option<ActiveSession>>>;

/// Runs one generation session at a time.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Option<Arc<EventStore>>,
    slot: Slot,
    epoch: Mutex<u64>,
    start_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            store: None,
            slot: Arc::default(),
            epoch: Mutex::new(0),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Record every session into `store`.
    pub fn with_store(mut self, store: Arc<EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    /// Id of the session currently running, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        self.slot.lock().as_ref().map(|active| active.id)
    }

    /// Start a session, replacing any active one.
    ///
    /// Fails with [`Error::PreconditionFailed`] before touching anything if
    /// the history is empty or the model handle is unusable. Otherwise the
    /// active session is cancelled with reason `"superseded"` and its cleanup
    /// awaited before the new one is installed.
    pub async fn start_session<B>(
        &self,
        id: SessionId,
        model: ModelHandle<B>,
        mut history: Vec<Message>,
        custom_instructions: &str,
        effective_tools: BTreeMap<String, ToolDescriptor>,
    ) -> Result<SessionHandle>
    where
        B: Backend + 'static,
    {
        check_preconditions(&model, &history)?;

        let _starting = self.start_lock.lock().await;
        self.supersede_active().await;

        let custom_instructions = custom_instructions.trim();
        if !custom_instructions.is_empty() {
            if history.iter().any(|m| m.role == Role::System) {
                info!(session_id = %id, "history already has a system message; custom instructions skipped");
            } else {
                history.insert(0, Message::system(custom_instructions));
            }
        }

        let cancel = Cancel::default();
        let (done_tx, done_rx) = watch::channel(false);
        let epoch = {
            let mut epoch = self.epoch.lock();
            *epoch += 1;
            *epoch
        };
        *self.slot.lock() = Some(ActiveSession {
            id,
            epoch,
            cancel: cancel.clone(),
            done: done_rx,
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let recorder = Recorder::new(id, self.store.clone());
        let generation = Generation {
            id,
            backend: model.backend,
            tools: effective_tools,
            history,
            max_steps: self.config.max_steps,
            cancel: cancel.token.clone(),
            events: events_tx,
            recorder: recorder.clone(),
        };

        info!(
            session_id = %id,
            provider = %model.provider,
            model = %model.model,
            tools = generation.tools.len(),
            "session started"
        );

        let slot = Arc::clone(&self.slot);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            // A panicking tool or backend must still release the slot below.
            let end = match AssertUnwindSafe(generation.run()).catch_unwind().await {
                Ok(Ok(Stop::Finished(summary))) => Ok(SessionEnd::Finished(summary)),
                Ok(Ok(Stop::StepLimit(summary))) => Ok(SessionEnd::StepLimit(summary)),
                Ok(Ok(Stop::Cancelled)) => Ok(SessionEnd::Cancelled {
                    reason: task_cancel.reason(),
                }),
                Ok(Err(e)) => Err(e),
                Err(panic) => Err(Error::Task(format!(
                    "session panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            let status = match &end {
                Ok(end) => {
                    info!(session_id = %id, status = %end.status(), "session ended");
                    end.status()
                }
                Err(e) => {
                    error!(session_id = %id, error = %e, "session failed");
                    storage::EndStatus::Failed
                }
            };
            recorder.record(EventKind::SessionEnd { status });

            {
                let mut slot = slot.lock();
                if slot.as_ref().is_some_and(|active| active.epoch == epoch) {
                    *slot = None;
                }
            }
            let _ = done_tx.send(true);
            end
        });

        Ok(SessionHandle::new(id, events_rx, cancel, task))
    }

    /// Cancel the active session, if any.
    ///
    /// Returns whether a session was active. Does not wait for it to stop.
    pub fn abort_active(&self, reason: &str) -> bool {
        match self.slot.lock().as_ref() {
            Some(active) => {
                info!(session_id = %active.id, reason, "aborting active session");
                active.cancel.cancel(reason);
                true
            }
            None => {
                warn!(reason, "abort requested but no session is active");
                false
            }
        }
    }

    /// Cancel the active session and wait until its task has cleaned up.
    async fn supersede_active(&self) {
        let prior = self
            .slot
            .lock()
            .as_ref()
            .map(|active| (active.id, active.cancel.clone(), active.done.clone()));

        let Some((prior_id, cancel, mut done)) = prior else {
            return;
        };
        info!(session_id = %prior_id, "superseding active session");
        cancel.cancel(SUPERSEDED);
        // A dropped sender means the task is gone; either way it is done.
        let _ = done.wait_for(|finished| *finished).await;
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

fn check_preconditions<B>(model: &ModelHandle<B>, history: &[Message]) -> Result<()> {
    if history.is_empty() {
        return Err(Error::PreconditionFailed("history is empty".into()));
    }
    if !model.enabled {
        return Err(Error::PreconditionFailed(format!(
            "provider {} is disabled",
            model.provider
        )));
    }
    if model.model.trim().is_empty() {
        return Err(Error::PreconditionFailed("no model selected".into()));
    }
    Ok(())
}
