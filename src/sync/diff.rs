//! Block-level diff between the last synced snapshot and the editor state.
//!
//! Identity is the block id; change detection compares the full JSON
//! serialization of a block, so any difference in type, props, content or
//! children counts. A spurious update is acceptable, a missed one is not.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::{Block, PositionedBlock};

/// Operations needed to bring the backend from `previous` to `current`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDiff {
    pub to_create: Vec<PositionedBlock>,
    pub to_update: Vec<PositionedBlock>,
    pub to_delete_ids: Vec<String>,
}

impl BlockDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete_ids.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete_ids.len()
    }
}

/// Partition `current` against the ids the backend holds.
///
/// - create: id not in `existing_ids`
/// - delete: id in `existing_ids` but not in `current`
/// - update: id in both, and its serialization differs from the block with
///   the same id in `previous` (or that block is missing from `previous`)
///
/// Created and updated blocks carry their index in `current`.
pub fn diff_blocks(
    previous: &[Block],
    current: &[Block],
    existing_ids: &HashSet<String>,
) -> BlockDiff {
    // First occurrence wins on both sides
    let mut previous_map: HashMap<&str, &Block> = HashMap::with_capacity(previous.len());
    for block in previous {
        previous_map.entry(block.id.as_str()).or_insert(block);
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(current.len());
    let mut diff = BlockDiff::default();

    for (position, block) in current.iter().enumerate() {
        if !seen.insert(block.id.as_str()) {
            log::warn!(
                "Diff: duplicate block id {} at position {}, keeping first occurrence",
                block.id,
                position
            );
            continue;
        }

        if !existing_ids.contains(&block.id) {
            diff.to_create.push(PositionedBlock {
                block: block.clone(),
                position,
            });
            continue;
        }

        let changed = match previous_map.get(block.id.as_str()) {
            Some(old) => old.fingerprint() != block.fingerprint(),
            None => true,
        };
        if changed {
            diff.to_update.push(PositionedBlock {
                block: block.clone(),
                position,
            });
        }
    }

    // Deletions in the order they appeared before, stragglers sorted
    let mut deleted: HashSet<&str> = HashSet::new();
    for block in previous {
        if existing_ids.contains(&block.id)
            && !seen.contains(block.id.as_str())
            && deleted.insert(block.id.as_str())
        {
            diff.to_delete_ids.push(block.id.clone());
        }
    }
    let mut stragglers: Vec<&String> = existing_ids
        .iter()
        .filter(|id| !seen.contains(id.as_str()) && !deleted.contains(id.as_str()))
        .collect();
    stragglers.sort();
    diff.to_delete_ids.extend(stragglers.into_iter().cloned());

    diff
}

/// Ids of a block list, for seeding the existing-id set.
pub fn block_ids(blocks: &[Block]) -> HashSet<String> {
    blocks.iter().map(|b| b.id.clone()).collect()
}
