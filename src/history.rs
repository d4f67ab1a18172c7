//! Bounded in-memory conversation history.
//!
//! Insertion-ordered `{role, content}` entries, capped to the most recent
//! [`defaults::HISTORY_CAP`] (oldest evicted). Used only as context for the
//! exchange client; cleared on activation and deactivation, never persisted.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::defaults;

/// Who produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation entry, wire-compatible with the exchange payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Bounded conversation history.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    cap: usize,
}

impl History {
    /// Create an empty history with the default cap.
    pub fn new() -> Self {
        Self::with_cap(defaults::HISTORY_CAP)
    }

    /// Create an empty history with a custom cap.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Append an entry, evicting the oldest when the cap is exceeded.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        if self.cap == 0 {
            return;
        }
        while self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            role,
            content: content.into(),
        });
    }

    /// The most recent `n` entries in insertion order.
    pub fn context(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
