//! Error types for the reconciliation engine
//!
//! The taxonomy mirrors the failure scopes of a fleet pass: transport
//! failures are isolated to one router, validation failures to one device
//! record, persistence failures abort a class run at the scheduler level,
//! and config/cursor failures abort a run before any device call.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the reconciliation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Device unreachable or request timed out; scoped to one router
    #[error("transport error for router {router}: {message}")]
    Transport {
        /// Identifier of the affected router
        router: String,
        /// Underlying failure description
        message: String,
    },

    /// Malformed device record; scoped to one record
    #[error("invalid device record: {0}")]
    Validation(String),

    /// Persistence store read/write failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Cursor store read/write failure (fatal before any device call)
    #[error("cursor store error: {0}")]
    CursorStore(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Referenced entity does not exist in the mirror
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid caller input (bad id, inactive router, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors (cursor file handling)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transport error scoped to a router
    pub fn transport(router: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            router: router.into(),
            message: message.into(),
        }
    }

    /// Create a validation error for a malformed device record
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a cursor store error
    pub fn cursor_store(msg: impl Into<String>) -> Self {
        Self::CursorStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True if this failure must withhold the class cursor when it
    /// surfaces during a fleet pass.
    ///
    /// Transport and validation failures are recovered locally; everything
    /// store- or config-shaped is fatal to the class run.
    pub fn is_fatal_to_class_run(&self) -> bool {
        !matches!(self, Self::Transport { .. } | Self::Validation(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
