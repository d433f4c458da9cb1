//! Bookkeeping for one notebook editing session: the last synced snapshot,
//! the latest unsynced editor state and the ids the backend holds.
//!
//! Snapshots are owned copies; nothing here aliases the caller's blocks.

use std::collections::HashSet;

use crate::models::Block;

use super::diff::{block_ids, diff_blocks, BlockDiff};

/// A block list captured for a flush, tagged with the edit revision it
/// reflects so completion can tell whether newer edits arrived meanwhile.
#[derive(Debug, Clone)]
pub struct FlushSnapshot {
    pub blocks: Vec<Block>,
    pub revision: u64,
    pub diff: BlockDiff,
}

#[derive(Debug, Clone, Default)]
pub struct BlockTracker {
    existing_ids: HashSet<String>,
    previous_blocks: Vec<Block>,
    pending_blocks: Option<Vec<Block>>,
    /// Bumped on every local edit
    revision: u64,
}

impl BlockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a freshly fetched notebook.
    pub fn seeded(fetched: &[Block]) -> Self {
        Self {
            existing_ids: block_ids(fetched),
            previous_blocks: fetched.to_vec(),
            pending_blocks: None,
            revision: 0,
        }
    }

    /// Replace every field; nothing of the old notebook survives.
    pub fn reset(&mut self, fetched: &[Block]) {
        *self = Self::seeded(fetched);
    }

    /// Capture the editor state right away so a force-save never loses it.
    pub fn record_edit(&mut self, blocks: Vec<Block>) -> u64 {
        self.pending_blocks = Some(blocks);
        self.revision += 1;
        self.revision
    }

    pub fn has_pending(&self) -> bool {
        self.pending_blocks.is_some()
    }

    pub fn pending(&self) -> Option<&[Block]> {
        self.pending_blocks.as_deref()
    }

    pub fn previous(&self) -> &[Block] {
        &self.previous_blocks
    }

    pub fn existing_ids(&self) -> &HashSet<String> {
        &self.existing_ids
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Pick what to flush: the pending edit if any, else `live`. Returns
    /// `None` when neither is available.
    pub fn snapshot(&self, live: Option<&[Block]>) -> Option<FlushSnapshot> {
        let blocks = match (self.pending_blocks.as_deref(), live) {
            (Some(pending), _) => pending.to_vec(),
            (None, Some(live)) => live.to_vec(),
            (None, None) => return None,
        };
        let diff = diff_blocks(&self.previous_blocks, &blocks, &self.existing_ids);
        Some(FlushSnapshot {
            blocks,
            revision: self.revision,
            diff,
        })
    }

    /// Optimistic bookkeeping at issue time of a create.
    pub fn mark_created(&mut self, block_id: &str) {
        self.existing_ids.insert(block_id.to_string());
    }

    /// Optimistic bookkeeping at issue time of a delete.
    pub fn mark_deleted(&mut self, block_id: &str) {
        self.existing_ids.remove(block_id);
    }

    /// Advance the synced snapshot. Pending is only cleared when no edit
    /// landed after the snapshot was taken.
    pub fn mark_synced(&mut self, snapshot: &FlushSnapshot) {
        self.previous_blocks = snapshot.blocks.clone();
        if self.revision == snapshot.revision {
            self.pending_blocks = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(ids: &[&str]) -> Vec<Block> {
        ids.iter().map(|id| Block::new(*id, "paragraph")).collect()
    }

    #[test]
    fn test_seeded_state() {
        let tracker = BlockTracker::seeded(&blocks(&["a", "b"]));
        assert_eq!(tracker.existing_ids().len(), 2);
        assert_eq!(tracker.previous().len(), 2);
        assert!(!tracker.has_pending());
        assert!(tracker.snapshot(None).is_none());
    }

    #[test]
    fn test_pending_wins_over_live() {
        let mut tracker = BlockTracker::seeded(&blocks(&["a"]));
        tracker.record_edit(blocks(&["a", "b"]));

        let snapshot = tracker.snapshot(Some(&blocks(&["a"]))).unwrap();
        assert_eq!(snapshot.blocks.len(), 2);
        assert_eq!(snapshot.diff.to_create.len(), 1);
    }

    #[test]
    fn test_live_used_without_pending() {
        let tracker = BlockTracker::seeded(&blocks(&["a"]));
        let snapshot = tracker.snapshot(Some(&blocks(&[]))).unwrap();
        assert_eq!(snapshot.diff.to_delete_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_mark_synced_keeps_newer_edit() {
        let mut tracker = BlockTracker::seeded(&[]);
        tracker.record_edit(blocks(&["a"]));
        let snapshot = tracker.snapshot(None).unwrap();

        // Edit arrives while the flush is in flight
        tracker.record_edit(blocks(&["a", "b"]));
        tracker.mark_created("a");
        tracker.mark_synced(&snapshot);

        assert!(tracker.has_pending());
        assert_eq!(tracker.previous().len(), 1);

        let next = tracker.snapshot(None).unwrap();
        assert_eq!(next.diff.to_create.len(), 1);
        assert_eq!(next.diff.to_create[0].block.id, "b");
        tracker.mark_created("b");
        tracker.mark_synced(&next);
        assert!(!tracker.has_pending());
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut tracker = BlockTracker::seeded(&blocks(&["a"]));
        tracker.record_edit(blocks(&["a", "b"]));
        tracker.reset(&blocks(&["x"]));

        assert!(!tracker.has_pending());
        assert_eq!(tracker.revision(), 0);
        assert!(tracker.existing_ids().contains("x"));
        assert!(!tracker.existing_ids().contains("a"));
    }
}
