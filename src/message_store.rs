//! Ordered in-memory message store
//!
//! Holds the committed turns of one conversation. Every entry point runs
//! turns through the same validity filter, so the store never contains a
//! turn without an id. Entries are never edited in place: consumers see a
//! read-only slice plus a revision counter that bumps on every change.

use crate::types::ChatTurn;

/// Ordered list of committed chat turns
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    turns: Vec<ChatTurn>,
    revision: u64,
}

impl MessageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, preserving submission order
    ///
    /// Returns false (and leaves the store unchanged) for invalid turns.
    pub fn append(&mut self, turn: ChatTurn) -> bool {
        if !turn.is_valid() {
            tracing::debug!(role = %turn.role, "Dropping invalid turn on append");
            return false;
        }
        self.turns.push(turn);
        self.revision += 1;
        true
    }

    /// Replace the whole collection, silently dropping invalid turns
    ///
    /// Returns the number of turns dropped.
    pub fn replace_all(&mut self, turns: Vec<ChatTurn>) -> usize {
        let total = turns.len();
        self.turns = turns.into_iter().filter(ChatTurn::is_valid).collect();
        self.revision += 1;

        let dropped = total - self.turns.len();
        if dropped > 0 {
            tracing::debug!(dropped, kept = self.turns.len(), "Dropped invalid turns");
        }
        dropped
    }

    /// Replace the collection from untyped JSON values
    ///
    /// Entries that do not deserialize into a `ChatTurn` (missing `content`,
    /// non-numeric `timestamp`, unknown role, ...) are dropped like any other
    /// invalid turn. Returns the number of entries dropped.
    pub fn replace_all_values(&mut self, values: Vec<serde_json::Value>) -> usize {
        let total = values.len();
        let turns = sanitize_values(values);
        let rejected = total - turns.len();
        rejected + self.replace_all(turns)
    }

    /// Keep only the most recent `max` turns
    pub fn retain_last(&mut self, max: usize) {
        if self.turns.len() > max {
            let excess = self.turns.len() - max;
            self.turns.drain(..excess);
            self.revision += 1;
        }
    }

    /// Remove every turn
    pub fn clear(&mut self) {
        self.turns.clear();
        self.revision += 1;
    }

    /// Read-only view of the committed turns, oldest first
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Owned copy of the committed turns
    pub fn snapshot(&self) -> Vec<ChatTurn> {
        self.turns.clone()
    }

    /// Last committed turn
    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Monotonic counter bumped on every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Deserialize each value independently, keeping only well-formed turns
pub fn sanitize_values(values: Vec<serde_json::Value>) -> Vec<ChatTurn> {
    values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<ChatTurn>(value).ok())
        .filter(ChatTurn::is_valid)
        .collect()
}
