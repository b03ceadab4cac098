//! Undo/redo over committed deltas.
//!
//! Entries are applied against the live state at the time of the undo, not
//! the state they were recorded against, so edits made by other actors in
//! between survive. An entry that no longer applies at all is dropped and
//! the next one is tried.

use std::collections::VecDeque;
use std::sync::Arc;

use inkboard_core::{Applied, ApplyOptions, Delta, ElementId, ElementMap, ObservedAppState};

/// Default maximum number of undo entries
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// Bounded undo and redo stacks
#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<Arc<Delta>>,
    redo: Vec<Arc<Delta>>,
    max_depth: usize,
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_depth,
        }
    }

    /// Push a committed delta and invalidate the redo stack
    pub fn record(&mut self, delta: Arc<Delta>) {
        if delta.is_empty() {
            return;
        }
        self.push_undo(delta);
        self.redo.clear();
    }

    fn push_undo(&mut self, delta: Arc<Delta>) {
        self.undo.push_back(delta);
        while self.undo.len() > self.max_depth {
            self.undo.pop_front();
        }
    }

    /// Revert the most recent applicable entry against the live state.
    ///
    /// Returns `None` when nothing could be undone.
    pub fn undo(
        &mut self,
        elements: &ElementMap,
        app_state: &ObservedAppState,
        options: &ApplyOptions,
    ) -> Option<Applied> {
        while let Some(delta) = self.undo.pop_back() {
            let applied = delta.invert().apply_to(elements, app_state, options);
            if applied.success {
                tracing::debug!(delta = %delta.id, "undo");
                self.redo.push(delta);
                return Some(applied);
            }
            tracing::warn!(delta = %delta.id, "discarding inapplicable undo entry");
        }
        None
    }

    /// Re-apply the most recently undone applicable entry
    pub fn redo(
        &mut self,
        elements: &ElementMap,
        app_state: &ObservedAppState,
        options: &ApplyOptions,
    ) -> Option<Applied> {
        while let Some(delta) = self.redo.pop() {
            let applied = delta.apply_to(elements, app_state, options);
            if applied.success {
                tracing::debug!(delta = %delta.id, "redo");
                self.push_undo(delta);
                return Some(applied);
            }
            tracing::warn!(delta = %delta.id, "discarding inapplicable redo entry");
        }
        None
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Number of undo entries
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Number of redo entries
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Whether any entry on either stack refers to `id`
    pub fn references(&self, id: &ElementId) -> bool {
        self.undo.iter().chain(self.redo.iter()).any(|d| d.references(id))
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}
