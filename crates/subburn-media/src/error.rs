//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running the encoder.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Encoder binary not found: {0}")]
    EncoderNotFound(String),

    #[error("Probe binary not found: {0}")]
    ProbeNotFound(String),

    #[error("Failed to launch encoder: {message}")]
    LaunchFailed { message: String },

    #[error("Encode failed: {message}")]
    EncodeFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Probe failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Encoder produced no output at {0}")]
    EmptyOutput(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an encode failure error.
    pub fn encode_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::EncodeFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a launch failure error.
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            message: message.into(),
        }
    }

    /// Diagnostic text carried by this error, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            MediaError::EncodeFailed { stderr, .. } => stderr.as_deref(),
            MediaError::ProbeFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}
