//! Error types for voxloop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxloopError {
    // Activation / permission errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    // Exchange errors
    #[error("Exchange request failed: {message}")]
    Exchange { message: String },

    #[error("Exchange returned status {status}")]
    ExchangeStatus { status: u16 },

    #[error("Exchange response could not be decoded: {message}")]
    ExchangeDecode { message: String },

    #[error("Speech synthesis timed out after {timeout_ms} ms")]
    SynthesisTimeout { timeout_ms: u64 },

    // Playback errors
    #[error("Playback failed: {message}")]
    Playback { message: String },
}

impl From<reqwest::Error> for VoxloopError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            VoxloopError::ExchangeDecode {
                message: err.to_string(),
            }
        } else {
            VoxloopError::Exchange {
                message: err.to_string(),
            }
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxloopError>;
