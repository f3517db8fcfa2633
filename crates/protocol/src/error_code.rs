use serde::{Deserialize, Serialize};

/// Stable, machine-readable error codes surfaced to clients.
///
/// The outer layer maps these to HTTP statuses; the strings are part of the
/// wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "missing_parameter")]
    MissingParameter,
    #[serde(rename = "incorrect_request")]
    IncorrectRequest,
    #[serde(rename = "invalid_crc")]
    InvalidCrc,
    #[serde(rename = "stream_disconnected")]
    StreamDisconnected,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "internal")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingParameter => "missing_parameter",
            ErrorCode::IncorrectRequest => "incorrect_request",
            ErrorCode::InvalidCrc => "invalid_crc",
            ErrorCode::StreamDisconnected => "stream_disconnected",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }

    /// Whether the client can recover by retrying or reconciling.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidCrc | ErrorCode::StreamDisconnected
        )
    }
}
