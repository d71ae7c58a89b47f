//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
///
/// Only initialization paths surface errors; runtime failures inside the
/// pipeline (network, malformed frames, transient store errors) are
/// absorbed with logs and retries.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
