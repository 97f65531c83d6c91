//! services/podcast/src/error.rs
//!
//! Defines the error types of the podcast service: the failure taxonomy of a
//! generation run, and the top-level error returned by the binary.

use crate::config::ConfigError;
use podcast_core::{CodecError, PortError};
use std::time::Duration;

/// Everything that can end a connection attempt or a whole generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The transport failed to connect, or dropped while a frame was awaited.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A frame arrived whose type/event is not the one the script waited for.
    #[error("Protocol mismatch: expected {expected}, received {received}")]
    ProtocolMismatch { expected: String, received: String },

    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    /// An Error-typed frame, or a session failure reported by the server.
    #[error("Server error (code {code:?}): {message}")]
    Server { code: Option<u32>, message: String },

    /// A round ended with `is_error`. Logged and absorbed, never propagated.
    #[error("Round {round_id} ended with an error: {detail}")]
    Round { round_id: i64, detail: String },

    /// A malformed or truncated binary frame.
    #[error("Frame codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Malformed JSON payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Generation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl From<PortError> for GenerationError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Connection(msg) | PortError::Unexpected(msg) => {
                GenerationError::Connection(msg)
            }
            PortError::Closed => GenerationError::Connection("connection closed".to_string()),
        }
    }
}

impl GenerationError {
    pub fn is_connection(&self) -> bool {
        matches!(self, GenerationError::Connection(_))
    }
}

/// The primary error type for the `podcast` binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Reading inputs or writing artifacts.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
