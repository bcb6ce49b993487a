//! src/source/mod.rs
//!
//! Block sources turn one block of a manifest (local or remote) into an
//! [`EncodedRecordList`].
//!
//! Two implementations are provided:
//! - [`FileBlockSource`]: reads a local manifest and decodes every element
//!   according to its column type
//! - [`RemoteBlockSource`]: fetches pre-encoded blocks of one shard of a
//!   remote collection over HTTP
//!
//! Sources are synchronous. They run on the fill thread of a
//! [`BlockLoader`] or a [`BlockManager`](crate::cache::BlockManager), which
//! provides the overlap with the consumer.

mod file;
mod loader;
mod remote;

use anyhow::{Context, Result};
use tracing::info;

pub use file::{decode_element, FileBlockSource};
pub use loader::BlockLoader;
pub use remote::{RemoteBlockSource, RemoteMetadata};

use crate::config::LoaderConfig;
use crate::record::EncodedRecordList;

/// Shape and identity of a block source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub record_count: usize,
    pub block_count: usize,
    pub block_size: usize,
    pub elements_per_record: usize,
    pub uid: u32,
}

/// A source of encoded blocks with its own block load sequence.
pub trait BlockSource: Send + 'static {
    fn record_count(&self) -> usize;

    fn block_count(&self) -> usize;

    /// Largest number of records in a block.
    fn block_size(&self) -> usize;

    fn elements_per_record(&self) -> usize;

    /// Stable identifier of the source content, used to name its cache
    /// directory.
    fn uid(&self) -> u32;

    /// Next block index of the current pass, `None` at the end of the pass.
    fn next_block_index(&mut self) -> Option<usize>;

    /// Starts a new pass of the load sequence (reshuffling if enabled).
    fn reset(&mut self);

    /// Loads block `index` into `block`, replacing its contents.
    ///
    /// Element decode failures are stored in the element slots; only
    /// failures affecting the whole block are returned as errors.
    fn load_block(&self, index: usize, block: &mut EncodedRecordList) -> Result<()>;

    /// Loads the next block of the pass into `block`.
    ///
    /// Returns the index of the loaded block, or `None` at the end of the
    /// pass. A block that loads empty also ends the pass.
    fn fill(&mut self, block: &mut EncodedRecordList) -> Result<Option<usize>> {
        block.clear();
        let Some(index) = self.next_block_index() else {
            return Ok(None);
        };
        self.load_block(index, block)
            .with_context(|| format!("Failed to load block {}", index))?;
        if block.is_empty() {
            return Ok(None);
        }
        Ok(Some(index))
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            record_count: self.record_count(),
            block_count: self.block_count(),
            block_size: self.block_size(),
            elements_per_record: self.elements_per_record(),
            uid: self.uid(),
        }
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn record_count(&self) -> usize {
        (**self).record_count()
    }

    fn block_count(&self) -> usize {
        (**self).block_count()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn elements_per_record(&self) -> usize {
        (**self).elements_per_record()
    }

    fn uid(&self) -> u32 {
        (**self).uid()
    }

    fn next_block_index(&mut self) -> Option<usize> {
        (**self).next_block_index()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn load_block(&self, index: usize, block: &mut EncodedRecordList) -> Result<()> {
        (**self).load_block(index, block)
    }

    fn fill(&mut self, block: &mut EncodedRecordList) -> Result<Option<usize>> {
        (**self).fill(block)
    }
}

/// Builds the block source described by `config`.
///
/// A config with a `remote` section reads from the remote collection;
/// otherwise the manifest file is loaded.
///
/// # Errors
///
/// Fails if the config is invalid, the manifest cannot be loaded or the
/// remote metadata cannot be fetched.
pub fn create_block_source(config: &LoaderConfig) -> Result<Box<dyn BlockSource>> {
    config.validate()?;

    if let Some(remote) = &config.remote {
        info!(url = %remote.url, shard = remote.shard_index, "using remote block source");
        let source = RemoteBlockSource::connect(
            remote.clone(),
            config.block_size,
            config.shuffle_manifest,
            config.random_seed,
        )?;
        return Ok(Box::new(source));
    }

    let path = config
        .manifest_filename
        .as_deref()
        .context("manifest_filename is required without a remote source")?;
    info!(manifest = %path.display(), "using file block source");
    let source = FileBlockSource::open(path, &config.manifest_options())?;
    Ok(Box::new(source))
}
