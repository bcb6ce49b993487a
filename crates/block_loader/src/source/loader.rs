//! src/source/loader.rs
//!
//! Async stage that prefetches blocks straight from a source, without a
//! disk cache.

use anyhow::Result;
use tracing::info;

use super::{BlockSource, SourceInfo};
use crate::pipeline::{AsyncManager, BlockStream, Fill};
use crate::record::EncodedRecordList;

pub(crate) struct SourceFill<S> {
    source: S,
}

impl<S: BlockSource> Fill for SourceFill<S> {
    type Buffer = EncodedRecordList;

    fn fill(&mut self, buffer: &mut EncodedRecordList) -> Result<bool> {
        Ok(self.source.fill(buffer)?.is_some())
    }

    fn reset(&mut self) -> Result<()> {
        self.source.reset();
        Ok(())
    }
}

/// Prefetches the next block of a [`BlockSource`] on a background thread.
pub struct BlockLoader<S: BlockSource> {
    inner: AsyncManager<SourceFill<S>>,
    info: SourceInfo,
    pass_complete: bool,
    passes: usize,
}

impl<S: BlockSource> BlockLoader<S> {
    pub fn new(source: S) -> Result<Self> {
        let info = source.info();
        let inner = AsyncManager::new("block-loader", SourceFill { source })?;
        Ok(Self {
            inner,
            info,
            pass_complete: false,
            passes: 0,
        })
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// Number of passes that ran to completion.
    pub fn passes(&self) -> usize {
        self.passes
    }
}

impl<S: BlockSource> BlockStream for BlockLoader<S> {
    fn next_block(&mut self) -> Result<Option<&mut EncodedRecordList>> {
        if self.pass_complete {
            self.inner.reset()?;
            self.pass_complete = false;
        }
        match self.inner.next()? {
            Some(block) => Ok(Some(block)),
            None => {
                self.pass_complete = true;
                self.passes += 1;
                info!(pass = self.passes, "block loader finished pass");
                Ok(None)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.reset()?;
        self.pass_complete = false;
        Ok(())
    }
}
