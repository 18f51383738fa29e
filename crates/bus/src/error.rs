//! Bus error types.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("transport already set")]
    TransportAlreadySet,

    #[error("invalid patch path: {0}")]
    InvalidPath(String),

    #[error("patch target not found: {0}")]
    PathNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
