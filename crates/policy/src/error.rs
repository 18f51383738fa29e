//! Policy error types.

use thiserror::Error;

/// Errors reading or writing a policy file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to read policy: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse policy: {0}")]
    Parse(String),

    /// The policy could not be rendered back to TOML.
    #[error("failed to serialize policy: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, Error>;
