//! Local undo/redo over full-canvas checkpoints.
//!
//! Checkpoints cover the whole raster, remote strokes included, so undo
//! rolls back everything drawn since the local checkpoint. Remote events
//! never touch either stack.

use std::collections::VecDeque;

use crate::surface::Raster;

pub const DEFAULT_HISTORY_DEPTH: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub index: u64,
    pub raster: Raster,
}

#[derive(Debug)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    depth: usize,
    next_index: u64,
}

impl Default for History {
    fn default() -> Self {
        Self::with_depth(DEFAULT_HISTORY_DEPTH)
    }
}

impl History {
    pub fn with_depth(depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            depth: depth.max(1),
            next_index: 0,
        }
    }

    /// Records the canvas as it was before a local gesture and invalidates
    /// redo. Call once per gesture, not per point.
    pub fn snapshot_before_gesture(&mut self, current: Raster) {
        let entry = self.entry(current);
        self.undo.push_back(entry);
        while self.undo.len() > self.depth {
            self.undo.pop_front();
        }
        self.redo.clear();
    }

    pub fn undo(&mut self, current: Raster) -> Option<Raster> {
        let previous = self.undo.pop_back()?;
        let entry = self.entry(current);
        self.redo.push(entry);
        Some(previous.raster)
    }

    pub fn redo(&mut self, current: Raster) -> Option<Raster> {
        let next = self.redo.pop()?;
        let entry = self.entry(current);
        self.undo.push_back(entry);
        Some(next.raster)
    }

    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    /// Drops both stacks, as a full-board clear does.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn last_checkpoint(&self) -> Option<&HistoryEntry> {
        self.undo.back()
    }

    fn entry(&mut self, raster: Raster) -> HistoryEntry {
        let index = self.next_index;
        self.next_index += 1;
        HistoryEntry { index, raster }
    }
}
