//! src/manifest/sequence.rs
//!
//! Order in which the blocks of one pass are loaded.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::SEQUENCE_SEED_OFFSET;

/// A cursor over a permutation of block indices.
///
/// The sequence starts in identity order. Every `reset()` starts a new pass
/// and, when shuffling is enabled, draws a fresh permutation from a generator
/// seeded with the base seed and the pass number, so a given seed always
/// produces the same sequence of passes.
#[derive(Debug, Clone)]
pub struct BlockSequence {
    order: Vec<usize>,
    cursor: usize,
    shuffle: bool,
    base_seed: u64,
    pass: u64,
}

impl BlockSequence {
    pub fn new(block_count: usize, shuffle: bool, base_seed: u64) -> Self {
        Self {
            order: (0..block_count).collect(),
            cursor: 0,
            shuffle,
            base_seed,
            pass: 0,
        }
    }

    /// Next block index of the current pass, `None` once the pass is over.
    /// Does not wrap around.
    pub fn next(&mut self) -> Option<usize> {
        let index = self.order.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(index)
    }

    /// Rewinds the cursor and starts a new pass.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.pass += 1;
        if self.shuffle {
            let seed = self
                .base_seed
                .wrapping_add(SEQUENCE_SEED_OFFSET)
                .wrapping_add(self.pass);
            let mut rng = StdRng::seed_from_u64(seed);
            self.order.shuffle(&mut rng);
        }
    }

    /// Block indices of the current pass, in load order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Number of resets so far.
    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
