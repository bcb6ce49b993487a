//! src/pipeline/decoder.rs
//!
//! Runs a provider over every record of a batch.

use anyhow::{Context, Result};

use super::{AsyncManager, BatchIterator, BlockStream, Fill};
use crate::provider::{OutputBuffers, Provider};

struct DecodeFill<B: BlockStream, P> {
    batches: BatchIterator<B>,
    provider: P,
}

impl<B: BlockStream, P: Provider> Fill for DecodeFill<B, P> {
    type Buffer = OutputBuffers;

    fn fill(&mut self, outputs: &mut OutputBuffers) -> Result<bool> {
        let batch_size = self.batches.batch_size();
        let Some(batch) = self.batches.next()? else {
            return Ok(false);
        };

        // Buffers start empty; lay them out on first use.
        if outputs.capacity() != batch_size || outputs.stream_names().next().is_none() {
            *outputs = OutputBuffers::for_provider(&self.provider, batch_size)?;
        }

        for (index, record) in batch.records().iter().enumerate() {
            self.provider
                .provide(index, record, outputs)
                .with_context(|| format!("provider failed on record {} of the batch", index))?;
        }
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.batches.reset()
    }
}

/// Decoded batches: one [`OutputBuffers`] per batch, filled by a
/// [`Provider`] on a background thread.
pub struct BatchDecoder<B: BlockStream, P: Provider> {
    inner: AsyncManager<DecodeFill<B, P>>,
}

impl<B: BlockStream, P: Provider> BatchDecoder<B, P> {
    pub fn new(batches: BatchIterator<B>, provider: P) -> Result<Self> {
        let fill = DecodeFill { batches, provider };
        Ok(Self {
            inner: AsyncManager::new("batch-decoder", fill)?,
        })
    }

    /// Output buffers of the next batch, `None` if the data ran out.
    pub fn next(&mut self) -> Result<Option<&mut OutputBuffers>> {
        self.inner.next()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.inner.reset()
    }
}
