//! Common error types for lessonstore

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for lessonstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store-level and document-level failures.
///
/// Recoverable per-entity conditions (invalid identifiers, dangling references,
/// duplicate identities, deltas that are already applied) are reported as
/// records in pass reports rather than raised as errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error for stored payload columns
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store file does not exist; nothing was attempted
    #[error("Store not found: {}", .0.display())]
    StoreNotFound(PathBuf),

    /// Store structure cannot support the requested operation
    #[error("Store inconsistent: {0}")]
    StoreInconsistent(String),

    /// Lesson document could not be read or parsed
    #[error("Malformed document {}: {reason}", path.display())]
    MalformedDocument { path: PathBuf, reason: String },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
