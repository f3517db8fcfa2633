//! Upload orchestrator: the façade the outer transport layer talks to.
//!
//! Wires the state store, rate limiter and chunk processor together and
//! exposes the full upload lifecycle: prepare, push chunks, pause, resume,
//! cancel, tune rates, query progress, and reconcile after a disconnect.

mod error;
mod service;

pub use error::{process_error_code, UploadError};
pub use service::{ServiceSettings, UploadService};

// The listener types cross the service boundary unchanged.
pub use chunkstream_processor::{oneshot_listener, CompletionListener, ProcessError};
pub use chunkstream_protocol::{ErrorCode, FileStateSnapshot, UploadStateSnapshot};
