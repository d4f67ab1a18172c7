//! Turn token: the monotonically increasing counter that invalidates
//! superseded asynchronous work.
//!
//! Every asynchronous completion (reply fetch, synthesis, playback end)
//! captures the token of the turn it belongs to and compares it against the
//! current token before mutating any state. A mismatch means the turn was
//! superseded or the session was deactivated; the completion becomes a no-op.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing turn counter.
#[derive(Debug, Default)]
pub struct TurnCounter(AtomicU64);

impl TurnCounter {
    /// Create a new counter starting at 0.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// The current turn token.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Allocate the next turn and return its token.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Bump the counter without handing the new token to anyone.
    ///
    /// Used by `deactivate()`: everything in flight becomes stale, and no new
    /// work owns the fresh token.
    pub fn invalidate(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Reset the counter to 0 for a fresh session.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// Whether `token` still identifies the current turn.
    pub fn is_current(&self, token: u64) -> bool {
        self.current() == token
    }
}
