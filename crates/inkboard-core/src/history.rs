//! Undo/redo using whole-canvas snapshots.
//!
//! Each replica keeps its own history. Applying a snapshot overwrites both
//! sequences, so an undo also reverts remote edits made since the snapshot
//! was taken.

use std::collections::VecDeque;

use crate::canvas::Snapshot;

/// Default number of entries kept on each stack.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Manages undo/redo with canvas snapshots.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    undo_stack: VecDeque<Snapshot>,
    redo_stack: VecDeque<Snapshot>,
    limit: usize,
}

impl HistoryManager {
    pub fn new(limit: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn push_bounded(stack: &mut VecDeque<Snapshot>, snapshot: Snapshot, limit: usize) {
        stack.push_back(snapshot);
        while stack.len() > limit {
            stack.pop_front();
        }
    }

    /// Save the current state before a local mutation. Invalidates redo.
    pub fn record_before_mutation(&mut self, current: Snapshot) {
        Self::push_bounded(&mut self.undo_stack, current, self.limit);
        self.redo_stack.clear();
    }

    /// Step back. Returns the snapshot to apply, or `None` if there is nothing
    /// to undo.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.undo_stack.pop_back()?;
        Self::push_bounded(&mut self.redo_stack, current, self.limit);
        Some(previous)
    }

    /// Step forward again after an undo.
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.redo_stack.pop_back()?;
        Self::push_bounded(&mut self.undo_stack, current, self.limit);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Drop all history, e.g. when leaving a room.
    pub fn reset(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
