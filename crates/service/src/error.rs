use chunkstream_processor::ProcessError;
use chunkstream_protocol::ErrorCode;
use chunkstream_state::StateError;

/// Errors surfaced synchronously by the orchestrator API.
///
/// Asynchronous per-chunk outcomes travel through the completion listener
/// as [`ProcessError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// A required input was absent or invalid at the API boundary.
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// Unknown file id or an operation that does not fit the file's state.
    #[error("incorrect request: {0}")]
    IncorrectRequest(String),

    /// Reconciliation failed: the client's bytes for the unchecked range do
    /// not match what is on disk. The file has been truncated back to the
    /// validated prefix.
    #[error("invalid CRC of unchecked part")]
    InvalidCrc,

    #[error(transparent)]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Stable wire code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            UploadError::MissingParameter(_) => ErrorCode::MissingParameter,
            UploadError::IncorrectRequest(_) => ErrorCode::IncorrectRequest,
            UploadError::InvalidCrc => ErrorCode::InvalidCrc,
            UploadError::State(_) | UploadError::Io(_) => ErrorCode::Internal,
        }
    }
}

/// Stable wire code for a listener-delivered processing error.
pub fn process_error_code(error: &ProcessError) -> ErrorCode {
    match error {
        ProcessError::IncorrectRequest(_) => ErrorCode::IncorrectRequest,
        ProcessError::InvalidCrc { .. } => ErrorCode::InvalidCrc,
        ProcessError::StreamDisconnected(_) | ProcessError::PauseTimeout => {
            ErrorCode::StreamDisconnected
        }
        ProcessError::Cancelled => ErrorCode::Cancelled,
        ProcessError::State(_) | ProcessError::Io(_) => ErrorCode::Internal,
    }
}
