//! Unified error type for all Taskweave crates.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum TaskweaveError {
    /// Configuration file missing fields or unparseable.
    #[error("Config error: {0}")]
    Config(String),

    /// Persistence layer failure (open, migrate, query, transaction).
    #[error("Store error: {0}")]
    Store(String),

    /// Transport-level HTTP failure (connect, send, decode).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The model backend returned a non-success status or a malformed body.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The model backend answered with zero choices. This is the one hard
    /// pipeline error; it is never absorbed into a degraded fallback.
    #[error("Empty response from {0}")]
    EmptyResponse(String),

    /// Bad trigger spec, unknown timezone, out-of-range time component.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A finalized Run ended `failed`; the message mirrors the persisted
    /// failure reason. The Run and Task rows were durably updated before
    /// this error was returned.
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, TaskweaveError>;
