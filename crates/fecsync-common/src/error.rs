//! Error types for fecsync
//!
//! The taxonomy separates errors by how the engine reacts to them: transient
//! upstream errors are retried inside the API client, everything else aborts
//! the current run after exactly one terminal run-record write.

use thiserror::Error;

/// Result type alias for fecsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for fecsync
#[derive(Error, Debug)]
pub enum SyncError {
    /// Rate limit or network blip. Retried with backoff inside the API client;
    /// surfaces only once the retry budget is exhausted, at which point it is
    /// terminal for the run.
    #[error("transient upstream error after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// Unexpected envelope, cursor, or record shape. Signals an upstream API
    /// contract change, not transience. Never retried.
    #[error("upstream protocol error: {0}")]
    Protocol(String),

    /// Warehouse write failure. Typically schema, permission, or connectivity
    /// trouble that a retry will not fix. Never retried.
    #[error("raw load error: {0}")]
    Load(String),

    /// Failure to begin or finish a run record. If the finalize step itself
    /// fails, the run stays STARTED and an operator must reconcile it.
    #[error("run control error: {0}")]
    Control(String),

    /// Invalid configuration, rejected at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Create a transient upstream error
    pub fn transient(attempts: u32, message: impl Into<String>) -> Self {
        Self::Transient {
            attempts,
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a load error
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create a run-control error
    pub fn control(msg: impl Into<String>) -> Self {
        Self::Control(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error is worth retrying at the HTTP layer
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
