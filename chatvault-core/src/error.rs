//! Error types for chatvault-core
//!
//! Variants group into four classes that decide how the circuit breaker
//! treats them:
//!
//! | Class | Variants | Retried | Counted by breaker |
//! |-------|----------|---------|--------------------|
//! | configuration / platform | `Platform`, `Config` | no | no |
//! | resolution | `Resolution`, `SessionNotFound` | no | no |
//! | connection | `InvalidDatabase`, `Connection`, `Database`, `Io` | yes | yes |
//! | stored data | `Query`, `Json`, `Parse` | no | no |

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the chatvault-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Unsupported OS or missing environment value
    #[error("platform error: {0}")]
    Platform(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Workspace or database path could not be resolved
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Database file failed validation before any open attempt
    #[error("invalid database {}: {reason}", path.display())]
    InvalidDatabase { path: PathBuf, reason: String },

    /// Open, sanity check or throttled connection attempt
    #[error("connection error for {}: {message}", path.display())]
    Connection { path: PathBuf, message: String },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be read as a session list
    #[error("query error: {0}")]
    Query(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session payload failed validation
    #[error("parse error: {0}")]
    Parse(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Call rejected without running because the breaker is open
    #[error("circuit breaker is open; retry in {}ms", retry_after.as_millis())]
    CircuitOpen { retry_after: Duration },
}

impl Error {
    /// Connection-class errors are the only ones worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::InvalidDatabase { .. }
                | Error::Connection { .. }
                | Error::Database(_)
                | Error::Io(_)
        )
    }

    /// Whether the circuit breaker should record this outcome as a dependency failure.
    pub fn counts_as_failure(&self) -> bool {
        self.is_retryable()
    }

    pub(crate) fn connection(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Connection {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_database(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidDatabase {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for chatvault-core
pub type Result<T> = std::result::Result<T, Error>;
