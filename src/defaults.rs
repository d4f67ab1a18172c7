//! Default configuration constants for voxloop.
//!
//! This module provides shared constants used across the controller and
//! configuration types to ensure consistency and eliminate duplication.

use std::time::Duration;

/// Minimum transcript length (in characters, after trimming) worth processing.
///
/// Single-character transcripts are almost always recognizer noise ("a", "uh")
/// and would waste a network round trip.
pub const MIN_TRANSCRIPT_CHARS: usize = 2;

/// Maximum number of history entries kept in memory.
///
/// Oldest entries are evicted first. The history exists only as conversation
/// context for the exchange; it is never persisted.
pub const HISTORY_CAP: usize = 10;

/// Number of most-recent history entries sent as context with each reply request.
pub const HISTORY_CONTEXT: usize = 6;

/// Hard cap on the speech-synthesis call, in milliseconds.
///
/// Synthesis that takes longer than this is aborted and the turn falls back
/// to listening without speaking. The reply-text call has no default timeout;
/// see `ExchangeConfig::reply_timeout_ms`.
pub const SYNTHESIS_TIMEOUT_MS: u64 = 10_000;

/// Delay before restarting capture after a benign recognition end, in milliseconds.
///
/// Gives the platform recognizer time to release its session before a new
/// single-shot session is opened.
pub const RESTART_DELAY_MS: u64 = 300;

/// Delay before capture resumes after a turn completes, in milliseconds.
///
/// A short gap after playback prevents the tail of the assistant's own audio
/// from being picked up as user speech.
pub const RESUME_DELAY_MS: u64 = 300;

/// Default recognition language.
pub const LANGUAGE: &str = "en-US";

/// Convert a millisecond count into a `Duration`.
pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_context_fits_within_cap() {
        assert!(HISTORY_CONTEXT <= HISTORY_CAP);
    }

    #[test]
    fn synthesis_timeout_is_ten_seconds() {
        assert_eq!(millis(SYNTHESIS_TIMEOUT_MS), Duration::from_secs(10));
    }

    #[test]
    fn transcript_gate_rejects_single_characters() {
        assert_eq!(MIN_TRANSCRIPT_CHARS, 2);
    }
}
