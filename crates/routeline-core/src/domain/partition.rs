//! Work partitioning: split a unit range into bounded blocks.

use serde::{Deserialize, Serialize};

/// Default number of units per routing block.
pub const DEFAULT_BLOCK_SIZE: usize = 400;

/// One contiguous, inclusive sub-range `[start, end]` of a job's units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkBlock {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl WorkBlock {
    /// Number of units in the block (always at least one).
    pub fn units(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, unit: usize) -> bool {
        (self.start..=self.end).contains(&unit)
    }
}

/// Partition `units` into blocks of at most `block_size` units.
///
/// Blocks are returned in ascending order and cover `[0, units - 1]` without
/// gaps or overlap. Zero units yields no blocks. A `block_size` of zero is
/// treated as one so the function stays total.
pub fn partition(units: usize, block_size: usize) -> Vec<WorkBlock> {
    let block_size = block_size.max(1);
    (0..units)
        .step_by(block_size)
        .enumerate()
        .map(|(index, start)| WorkBlock {
            index,
            start,
            end: (start + block_size).min(units) - 1,
        })
        .collect()
}
