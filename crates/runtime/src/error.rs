use crate::model::ModelError;
use thiserror::Error;

/// Errors surfaced by the runtime.
///
/// Cancellation is not an error: a cancelled session ends with
/// [`SessionEnd::Cancelled`](crate::SessionEnd::Cancelled).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The session could not start; nothing was changed.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The model call failed mid-session.
    #[error("generation failed: {0}")]
    Generation(#[from] ModelError),

    /// The session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
