//! src/cache/directory.rs
//!
//! On-disk layout of one block cache:
//!
//! ```text
//! <cache_root>/<uid as 8 hex digits>/
//!     block_0, block_1, ...   encoded record lists
//!     complete                written once every block is present
//!     owner.lock              present while a process is building
//! ```

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::record::EncodedRecordList;

pub const COMPLETE_SENTINEL: &str = "complete";
pub const OWNER_LOCK: &str = "owner.lock";
const TMP_MARKER: &str = ".tmp.";

/// Directory name for the cache of the source with `uid`.
pub fn cache_name(uid: u32) -> String {
    format!("{:08x}", uid)
}

/// File name of cached block `index`.
pub fn block_name(index: usize) -> String {
    format!("block_{}", index)
}

#[derive(Debug, Clone)]
pub struct CacheDirectory {
    path: PathBuf,
}

impl CacheDirectory {
    /// Opens (creating if needed) the cache directory for `uid` under `root`.
    pub fn create(root: &Path, uid: u32) -> Result<Self> {
        let path = root.join(cache_name(uid));
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create cache directory {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_path(&self, index: usize) -> PathBuf {
        self.path.join(block_name(index))
    }

    pub fn contains_block(&self, index: usize) -> bool {
        self.block_path(index).is_file()
    }

    pub fn is_complete(&self) -> bool {
        self.path.join(COMPLETE_SENTINEL).is_file()
    }

    /// Writes the completion sentinel and syncs it to disk.
    pub fn mark_complete(&self) -> Result<()> {
        let path = self.path.join(COMPLETE_SENTINEL);
        let mut file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(b"complete\n")?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", path.display()))?;
        sync_dir(&self.path);
        Ok(())
    }

    /// Tries to become the only process building this cache.
    ///
    /// Returns `None` if another process holds the lock. Never waits.
    pub fn take_ownership(&self) -> Result<Option<OwnershipLock>> {
        let path = self.path.join(OWNER_LOCK);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                debug!(lock = %path.display(), "cache ownership acquired");
                let lock = OwnershipLock {
                    path,
                    released: false,
                };
                self.remove_partial_writes()?;
                Ok(Some(lock))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to create lock file {}", path.display()))
            }
        }
    }

    /// Deletes temporary block files left by a writer that died before
    /// renaming them. Only called while holding ownership.
    fn remove_partial_writes(&self) -> Result<()> {
        let entries = fs::read_dir(&self.path)
            .with_context(|| format!("Failed to list {}", self.path.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().contains(TMP_MARKER) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => warn!(file = %entry.path().display(), "removed partial block file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to remove {}", entry.path().display())
                    })
                }
            }
        }
        Ok(())
    }

    pub fn read_block(&self, index: usize) -> Result<EncodedRecordList> {
        let path = self.block_path(index);
        let bytes =
            fs::read(&path).with_context(|| format!("Failed to read cached block {}", path.display()))?;
        EncodedRecordList::from_bytes(&bytes)
            .with_context(|| format!("Failed to decode cached block {}", path.display()))
    }

    /// Writes block `index` under a temporary name, syncs it, then renames
    /// it into place so readers never see a partial block.
    pub fn write_block(&self, index: usize, block: &EncodedRecordList) -> Result<()> {
        let path = self.block_path(index);
        let tmp = self
            .path
            .join(format!("{}{}{}", block_name(index), TMP_MARKER, std::process::id()));

        let bytes = block.to_bytes()?;
        let mut file =
            File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move block into {}", path.display()))?;
        Ok(())
    }
}

/// Best-effort fsync of a directory so renames and new entries are durable.
fn sync_dir(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

/// Exclusive right to build a cache directory, held as a lock file.
///
/// The file is removed by `release()` or, failing that, on drop.
#[derive(Debug)]
pub struct OwnershipLock {
    path: PathBuf,
    released: bool,
}

impl OwnershipLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove lock file {}", self.path.display()))?;
        debug!(lock = %self.path.display(), "cache ownership released");
        Ok(())
    }
}

impl Drop for OwnershipLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove cache lock file");
        } else {
            debug!(lock = %self.path.display(), "cache ownership released on drop");
        }
    }
}
