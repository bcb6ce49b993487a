//! src/cache/mod.rs
//!
//! Disk cache between a block source and its consumer.
//!
//! A [`BlockManager`] wraps any [`BlockSource`] and serves its blocks through
//! an [`AsyncManager`], so the next block is read (from the cache or the
//! source) while the current one is consumed. Per cache directory it is in
//! one of three states:
//!
//! - **Disabled**: no cache root; blocks pass straight through.
//! - **Building**: this process owns the directory. Cached blocks are read
//!   back (hit), missing ones are loaded from the source and written (miss).
//!   Once every block has been stored, the `complete` sentinel is written
//!   and ownership is released.
//! - **Complete**: every block is on disk; no lock is needed and a missing
//!   block is an error.
//!
//! A directory that another process is still building cannot be joined:
//! construction fails with [`LoaderError::CacheBusy`] instead of waiting.

mod directory;

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub use directory::{
    block_name, cache_name, CacheDirectory, OwnershipLock, COMPLETE_SENTINEL, OWNER_LOCK,
};

use crate::config::LoaderConfig;
use crate::error::LoaderError;
use crate::pipeline::{AsyncManager, BlockStream, Fill};
use crate::record::EncodedRecordList;
use crate::source::{create_block_source, BlockSource, SourceInfo};

/// Cache state as seen from the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Disabled,
    Building,
    Complete,
}

/// Counters shared between the fill thread and the manager.
#[derive(Debug, Default)]
struct CacheShared {
    hits: AtomicUsize,
    misses: AtomicUsize,
    complete: AtomicBool,
}

enum CacheState {
    Disabled,
    Building {
        directory: CacheDirectory,
        lock: Option<OwnershipLock>,
        stored: Vec<bool>,
        remaining: usize,
    },
    Complete {
        directory: CacheDirectory,
    },
}

struct CacheFill<S> {
    source: S,
    state: CacheState,
    shared: Arc<CacheShared>,
}

impl<S: BlockSource> CacheFill<S> {
    /// Marks the cache complete, then gives up ownership.
    fn finish_build(&mut self) -> Result<()> {
        let CacheState::Building {
            directory, lock, ..
        } = &mut self.state
        else {
            return Ok(());
        };

        // The sentinel must be durable before another process can take the
        // lock and look at the directory.
        directory.mark_complete()?;
        if let Some(lock) = lock.take() {
            lock.release()?;
        }
        info!(cache = %directory.path().display(), "block cache complete");

        let directory = directory.clone();
        self.state = CacheState::Complete { directory };
        self.shared.complete.store(true, Ordering::Release);
        Ok(())
    }
}

impl<S: BlockSource> Fill for CacheFill<S> {
    type Buffer = EncodedRecordList;

    fn fill(&mut self, block: &mut EncodedRecordList) -> Result<bool> {
        block.clear();
        let Some(index) = self.source.next_block_index() else {
            return Ok(false);
        };

        let mut finished = false;
        match &mut self.state {
            CacheState::Disabled => {
                self.source.load_block(index, block)?;
            }
            CacheState::Complete { directory } => {
                if !directory.contains_block(index) {
                    bail!(LoaderError::CacheInconsistent {
                        path: directory.path().to_path_buf(),
                        block: index,
                    });
                }
                *block = directory.read_block(index)?;
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                debug!(block = index, "cache hit");
            }
            CacheState::Building {
                directory,
                stored,
                remaining,
                ..
            } => {
                if directory.contains_block(index) {
                    *block = directory.read_block(index)?;
                    self.shared.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(block = index, "cache hit");
                } else {
                    self.source.load_block(index, block)?;
                    // An empty block ends the pass and is never stored.
                    if block.is_empty() {
                        debug!(block = index, "empty block from source, ending pass");
                    } else {
                        directory.write_block(index, block)?;
                        self.shared.misses.fetch_add(1, Ordering::Relaxed);
                        debug!(block = index, records = block.len(), "cache miss");
                    }
                }

                if !block.is_empty() && !stored[index] {
                    stored[index] = true;
                    *remaining -= 1;
                    finished = *remaining == 0;
                }
            }
        }

        if finished {
            self.finish_build()?;
        }
        Ok(!block.is_empty())
    }

    fn reset(&mut self) -> Result<()> {
        self.source.reset();
        Ok(())
    }
}

/// Serves the blocks of a source through an optional disk cache, one block
/// ahead of the consumer.
///
/// # Example
/// ```ignore
/// let source = FileBlockSource::open("train.tsv", &ManifestOptions::default())?;
/// let mut manager = BlockManager::new(source, Some(Path::new("/scratch/cache")))?;
/// while let Some(block) = manager.next_block()? {
///     // first pass: misses, later passes: hits
/// }
/// ```
pub struct BlockManager<S: BlockSource> {
    inner: AsyncManager<CacheFill<S>>,
    info: SourceInfo,
    shared: Arc<CacheShared>,
    cache_path: Option<PathBuf>,
    pass_complete: bool,
    passes: usize,
}

impl<S: BlockSource> BlockManager<S> {
    /// Wraps `source`, caching its blocks under `cache_root` if given.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::CacheBusy`] if another process is building
    /// the same cache, or an I/O error if the directory cannot be set up.
    pub fn new(source: S, cache_root: Option<&Path>) -> Result<Self> {
        let info = source.info();
        let shared = Arc::new(CacheShared::default());

        let state = match cache_root {
            None => {
                info!("block cache disabled");
                CacheState::Disabled
            }
            Some(root) => open_cache(root, &info)?,
        };
        let cache_path = match &state {
            CacheState::Disabled => None,
            CacheState::Building { directory, .. } | CacheState::Complete { directory } => {
                Some(directory.path().to_path_buf())
            }
        };
        if matches!(state, CacheState::Complete { .. }) {
            shared.complete.store(true, Ordering::Release);
        }

        let mut fill = CacheFill {
            source,
            state,
            shared: Arc::clone(&shared),
        };
        if matches!(&fill.state, CacheState::Building { remaining: 0, .. }) {
            fill.finish_build()?;
        }

        let inner = AsyncManager::new("block-cache", fill)?;
        Ok(Self {
            inner,
            info,
            shared,
            cache_path,
            pass_complete: false,
            passes: 0,
        })
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    pub fn record_count(&self) -> usize {
        self.info.record_count
    }

    pub fn block_count(&self) -> usize {
        self.info.block_count
    }

    pub fn cache_hits(&self) -> usize {
        self.shared.hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> usize {
        self.shared.misses.load(Ordering::Relaxed)
    }

    pub fn cache_mode(&self) -> CacheMode {
        if self.cache_path.is_none() {
            CacheMode::Disabled
        } else if self.shared.complete.load(Ordering::Acquire) {
            CacheMode::Complete
        } else {
            CacheMode::Building
        }
    }

    /// Directory holding this source's cached blocks.
    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Number of passes that ran to completion.
    pub fn passes(&self) -> usize {
        self.passes
    }
}

impl BlockManager<Box<dyn BlockSource>> {
    /// Builds the source described by `config` and caches it under
    /// `config.cache_directory`.
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        let source = create_block_source(config)?;
        Self::new(source, config.cache_directory.as_deref())
    }
}

impl<S: BlockSource> BlockStream for BlockManager<S> {
    /// Next block of the pass, `None` at the end of the pass. The call after
    /// a `None` starts the next pass, reshuffling the block order if the
    /// source shuffles.
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
                info!(
                    pass = self.passes,
                    hits = self.shared.hits.load(Ordering::Relaxed),
                    misses = self.shared.misses.load(Ordering::Relaxed),
                    "block manager finished pass"
                );
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

fn open_cache(root: &Path, info: &SourceInfo) -> Result<CacheState> {
    let directory = CacheDirectory::create(root, info.uid)?;

    if directory.is_complete() {
        info!(cache = %directory.path().display(), "using complete block cache");
        return Ok(CacheState::Complete { directory });
    }

    match directory.take_ownership()? {
        Some(lock) => {
            info!(cache = %directory.path().display(), blocks = info.block_count, "building block cache");
            Ok(CacheState::Building {
                directory,
                lock: Some(lock),
                stored: vec![false; info.block_count],
                remaining: info.block_count,
            })
        }
        // The owner may have finished between the two checks.
        None if directory.is_complete() => {
            info!(cache = %directory.path().display(), "using complete block cache");
            Ok(CacheState::Complete { directory })
        }
        None => bail!(LoaderError::CacheBusy {
            path: directory.path().to_path_buf(),
        }),
    }
}
