// src/error.rs

//! Error types for shelly
//!
//! The variants follow the failure classes of the orchestration layer:
//! native call failures, missing targets, fetch transport failures,
//! cross-process protocol failures and elevation failures. The sync client
//! wraps the first three into [`Error::Operation`] so callers always see
//! which operation and package failed.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by shelly
#[derive(Debug, Error)]
pub enum Error {
    /// A native library call returned a failure code or null
    #[error("{operation} failed: {message}")]
    NativeCall {
        /// The native step that failed (e.g. "prepare transaction")
        operation: String,
        /// Resolved native error string, or `unknown error(<code>)`
        message: String,
    },

    /// Target package (or other named entity) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP or filesystem failure while fetching a file
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed or missing cross-process traffic
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// Privilege elevation was declined or no secret was available
    #[error("authentication failure: {0}")]
    Authentication(String),

    /// The privileged worker reported a failed command
    #[error("worker reported failure: {0}")]
    Remote(String),

    /// A failed operation attempted through the sync client
    #[error("failed to {action}: {source}")]
    Operation {
        /// Human readable description, e.g. "install 'firefox'"
        action: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// The native library or one of its symbols could not be resolved
    #[error("native library unavailable: {0}")]
    Library(String),

    /// An operation was attempted in the wrong transaction or session state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A callback handler could not produce an answer
    #[error("callback handler failed: {0}")]
    Callback(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a native failure for `operation`
    pub fn native(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NativeCall {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for failures the sync client translates into [`Error::Operation`]
    ///
    /// Protocol and authentication failures are never wrapped.
    pub fn is_operation_failure(&self) -> bool {
        matches!(
            self,
            Self::NativeCall { .. } | Self::NotFound(_) | Self::Transport(_)
        )
    }

    /// Innermost cause, looking through [`Error::Operation`] wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Operation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
