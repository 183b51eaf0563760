//! Error types for the settlement pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SettlementError>;

/// Errors that can occur while ingesting, settling, or managing state.
///
/// Per-line decode failures are not represented here; they are
/// [`DecodeError`](crate::decoder::DecodeError)s, logged and skipped.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Failed to read input or write output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A backing file (store, registry, outbox) could not be read or written
    #[error("Storage failure at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Attempt to add, edit or remove a reserved error code
    #[error("Error code {0} is protected and cannot be modified")]
    ProtectedCode(String),

    /// Registry input that cannot be persisted as `code=description`
    #[error("Invalid error code {code:?}: {reason}")]
    InvalidCode { code: String, reason: &'static str },

    /// Batch total does not fit the fixed-width header
    #[error("Batch {batch:03} of terminal {terminal_id}: amount {amount} exceeds the 10-digit header field")]
    HeaderOverflow {
        terminal_id: String,
        batch: usize,
        amount: u64,
    },
}

impl SettlementError {
    /// Wraps an I/O error with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SettlementError::Storage {
            path: path.into(),
            source,
        }
    }
}
