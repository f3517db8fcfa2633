//! Durable upload state: which files exist, where their bytes live on disk,
//! and how much of each has been CRC-validated.
//!
//! The store survives server restarts: every record mutation is written to a
//! JSON snapshot before the mutating call returns. On-disk file length is
//! deliberately *not* part of the snapshot: after a crash the data file
//! itself is the truth, and the store re-derives it at load time.

mod model;
mod store;

pub use model::{ClientRecord, FileRecord};
pub use store::StateStore;

/// Errors produced by the state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("{field} may not decrease ({current} -> {requested})")]
    NonMonotonicUpdate {
        field: &'static str,
        current: u64,
        requested: u64,
    },
}
