//! Error types and handling
//!
//! Common error types used across the pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid camera URL: {0}")]
    InvalidUrl(String),

    #[error("Stream unavailable: no frame received within {}ms", .0.as_millis())]
    StreamUnavailable(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(&'static str),

    #[error("Encoder init error: {0}")]
    EncoderInit(String),

    #[error("Encode error: {0}")]
    Encode(String),
}

/// Stable error categories reported to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidUrl,
    StreamUnavailable,
    ConnectionError,
    PreconditionFailed,
    EncoderInitError,
    EncodeError,
}

impl ErrorKind {
    /// Code string used in error responses
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "INVALID_URL",
            ErrorKind::StreamUnavailable => "STREAM_UNAVAILABLE",
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::PreconditionFailed => "PRECONDITION_FAILED",
            ErrorKind::EncoderInitError => "ENCODER_INIT_ERROR",
            ErrorKind::EncodeError => "ENCODE_ERROR",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            PipelineError::StreamUnavailable(_) => ErrorKind::StreamUnavailable,
            PipelineError::Connection(_) => ErrorKind::ConnectionError,
            PipelineError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            PipelineError::EncoderInit(_) => ErrorKind::EncoderInitError,
            PipelineError::Encode(_) => ErrorKind::EncodeError,
        }
    }
}

/// Error response for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(error: &PipelineError) -> Self {
        ErrorResponse {
            code: error.kind().code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<PipelineError> for ErrorResponse {
    fn from(error: PipelineError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(PipelineError::PreconditionFailed("not recording"));
        assert_eq!(response.code, "PRECONDITION_FAILED");
        assert_eq!(response.message, "Precondition failed: not recording");

        let response = ErrorResponse::from(PipelineError::StreamUnavailable(Duration::from_secs(5)));
        assert_eq!(response.code, "STREAM_UNAVAILABLE");
        assert!(response.message.contains("5000ms"));
    }

    #[test]
    fn test_error_kind_serializes_as_code() {
        let json = serde_json::to_string(&ErrorKind::EncoderInitError).unwrap();
        assert_eq!(json, "\"ENCODER_INIT_ERROR\"");
    }
}
