use std::iter::Rev;
use std::slice::Iter;

use crate::models::HistoryEntry;

/// Session-scoped, append-only record of pipeline runs.
#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry` at the end and returns the stored copy.
    pub fn append(&mut self, entry: HistoryEntry) -> &HistoryEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Entries in insertion order.
    pub fn all(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Most recent first. Call again to restart.
    pub fn reversed_view(&self) -> Rev<Iter<'_, HistoryEntry>> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_id(&self) -> usize {
        self.entries.len() + 1
    }
}
