//! voxloop - Headless turn-based voice-conversation controller
//!
//! Microphone capture, two-phase exchange (reply text, then synthesized
//! speech), playback, and the turn discipline that keeps them from stepping
//! on each other.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod activation;
pub mod capture;
pub mod config;
pub mod controller;
pub mod defaults;
pub mod error;
pub mod exchange;
pub mod history;
pub mod playback;
pub mod turn;

// Core seams (capture → exchange → playback)
pub use activation::{GrantedProbe, MicrophoneProbe};
pub use capture::{CaptureError, CaptureEvent, SpeechCapture};
pub use exchange::{ConversationApi, HttpExchange};
pub use playback::AudioSink;

// Controller
pub use controller::{Mood, MoodCallback, VoiceController, VoiceState};

// Error handling
pub use error::{Result, VoxloopError};

// Config
pub use config::Config;

// History
pub use history::{HistoryEntry, Role};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_no_trailing_plus() {
        let ver = version_string();
        assert!(!ver.ends_with('+'));
    }
}
