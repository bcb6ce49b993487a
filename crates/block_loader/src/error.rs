//! Error types for the block loading pipeline.
//!
//! Almost every fallible function in this crate returns `anyhow::Result`.
//! The variants below are the failures a caller may want to tell apart; they
//! travel inside `anyhow::Error` and can be recovered with `downcast_ref`:
//!
//! ```ignore
//! match BlockManager::new(source, Some(cache_root)) {
//!     Err(e) if matches!(e.downcast_ref(), Some(LoaderError::CacheBusy { .. })) => { /* ... */ }
//!     other => { /* ... */ }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// Malformed manifest: bad type header, unknown type token or a line
    /// whose column count disagrees with the rest of the manifest.
    #[error("manifest error at line {line}: {message}")]
    ManifestFormat { line: usize, message: String },

    /// Another process holds ownership of the cache directory and has not
    /// finished building it.
    #[error("cache directory {} is busy: another process is building it", .path.display())]
    CacheBusy { path: PathBuf },

    /// A completed cache is missing a block it should contain.
    #[error("cache directory {} is marked complete but block {block} is missing", .path.display())]
    CacheInconsistent { path: PathBuf, block: usize },

    /// The server answered with something other than 200.
    #[error("HTTP GET on '{url}' failed. status code: {status}")]
    HttpStatus { url: String, status: u16 },

    /// The request never produced a response.
    #[error("HTTP GET on '{url}' failed: {message}")]
    Transport { url: String, message: String },
}

/// A decode failure captured for a single element.
///
/// Stored in place of the element's bytes so the rest of the block stays
/// usable. It is raised only when that element is read.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ElementError {
    message: String,
}

impl ElementError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for ElementError {
    fn from(error: anyhow::Error) -> Self {
        // `{:#}` keeps the whole context chain on one line.
        Self::new(format!("{:#}", error))
    }
}
