use chunkstream_state::StateError;

/// Errors delivered through the completion listener (or, for validation
/// failures, surfaced before a worker is spawned).
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Unknown file id, upload already complete, or a second processor
    /// attempted on the same file.
    #[error("incorrect request: {0}")]
    IncorrectRequest(String),

    /// The chunk's declared CRC did not match the bytes received. The file
    /// has been truncated back to the validated prefix.
    #[error("invalid CRC: declared {declared}, computed {computed}")]
    InvalidCrc { declared: String, computed: String },

    /// The request body failed mid-chunk. Appended-but-unvalidated bytes
    /// stay on disk for reconciliation.
    #[error("user has stopped streaming")]
    StreamDisconnected(#[source] std::io::Error),

    /// The upload stayed paused longer than the configured maximum.
    /// Recovery is the same as for a disconnected stream: reconcile, then
    /// resume.
    #[error("paused longer than the configured maximum")]
    PauseTimeout,

    /// The cancel flag was observed. The partial file has been deleted.
    #[error("upload cancelled")]
    Cancelled,

    #[error(transparent)]
    State(#[from] StateError),

    /// Fatal I/O on the target file (disk full, path lost). Not retried.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
