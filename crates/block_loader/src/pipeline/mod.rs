//! src/pipeline/mod.rs
//!
//! Async stages of the pipeline.
//!
//! ```text
//! BlockSource -> BlockManager / BlockLoader -> BatchIterator -> BatchDecoder
//!   (sync)          (blocks, cached)            (records)       (output buffers)
//! ```
//!
//! Every arrow is an [`AsyncManager`]: the stage on the right owns the stage
//! on the left and drives it from its own fill thread.

mod async_manager;
mod batch;
mod decoder;

use anyhow::Result;

pub use async_manager::{AsyncManager, Fill};
pub use batch::BatchIterator;
pub use decoder::BatchDecoder;

use crate::record::EncodedRecordList;

/// A pass-structured stream of blocks.
pub trait BlockStream: Send + 'static {
    /// Next block of the current pass, or `None` once the pass is over. The
    /// call after a `None` begins a new pass.
    fn next_block(&mut self) -> Result<Option<&mut EncodedRecordList>>;

    /// Abandons the current pass; the next call begins a new one.
    fn reset(&mut self) -> Result<()>;
}
