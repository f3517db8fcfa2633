//! Wire-facing types for the upload service.
//!
//! The core is transport-agnostic: an outer HTTP (or WebSocket) layer
//! serializes these snapshots and error codes to clients. Field names use
//! camelCase on the wire.

mod error_code;
mod types;

pub use error_code::ErrorCode;
pub use types::{FileStateSnapshot, UploadStateSnapshot};
