// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size ring buffer delaying home-chain blocks by a confirmation depth.
//!
//! A block only leaves the buffer once `size` newer blocks were pushed after
//! it. Reverted blocks are dropped from the head of the buffer without any
//! check that they match what was pushed: the buffer trusts the order in
//! which the consensus set delivers changes.

use crate::types::{Block, ConsensusChangeId};

/// Block waiting in the buffer, together with the change that applied it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferedBlock {
    pub block: Block,
    pub change_id: ConsensusChangeId,
}

pub struct ReorgBuffer {
    slots: Vec<Option<BufferedBlock>>,
    // slot overwritten by the next push
    cursor: usize,
}

impl ReorgBuffer {
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "reorg buffer needs at least one slot");
        Self {
            slots: vec![None; size],
            cursor: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of blocks still waiting for confirmation.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a block and returns the one it displaced, which is now deep
    /// enough to act on.
    pub fn push(&mut self, block: Block, change_id: ConsensusChangeId) -> Option<BufferedBlock> {
        let evicted = self.slots[self.cursor].replace(BufferedBlock { block, change_id });
        self.cursor = (self.cursor + 1) % self.slots.len();
        evicted
    }

    /// Drops the most recently pushed block.
    pub fn rewind(&mut self) {
        self.cursor = (self.cursor + self.slots.len() - 1) % self.slots.len();
        self.slots[self.cursor] = None;
    }
}
