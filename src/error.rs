//! Error types for MaNGA data access operations

use thiserror::Error;

/// Main error type for data access operations
#[derive(Error, Debug)]
pub enum MangaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or contradictory caller input. Always local, never retried.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A resolved file path does not exist on disk.
    #[error("input file {0} not found")]
    FileNotFound(String),

    /// An identifier has zero matching rows in the DB or on the remote API.
    #[error("{0}")]
    NotFound(String),

    /// A fuzzy lookup matched more than one candidate.
    #[error("too ambiguous input {0:?}")]
    Ambiguous(String),

    #[error("unknown release {0:?}")]
    UnknownRelease(String),

    /// Transport-level failure talking to the remote API. The underlying
    /// message is preserved verbatim.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("some indices are out of limits")]
    IndexOutOfBounds,

    /// Operation not supported for this entity or origin.
    #[error("{0}")]
    Unsupported(String),

    #[error("database error: {0}")]
    Db(String),

    #[error("FITS error: {0}")]
    Fits(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Specialized Result type for data access operations
pub type Result<T> = std::result::Result<T, MangaError>;

impl From<bincode::Error> for MangaError {
    fn from(err: bincode::Error) -> Self {
        MangaError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MangaError {
    fn from(err: serde_json::Error) -> Self {
        MangaError::Serialization(err.to_string())
    }
}
