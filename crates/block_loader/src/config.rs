//! src/config.rs
//!
//! Configuration for the block loading pipeline
//!
//! The `LoaderConfig` struct stores the parameters that select the block
//! source, the cache location and how records are partitioned and ordered.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .manifest_filename("train.tsv")
//!     .manifest_root("/data/train")
//!     .cache_directory("/scratch/cache")
//!     .block_size(1000)
//!     .batch_size(32)
//!     .shuffle_manifest(true)
//!     .build();
//! ```
//!
//! The same settings can be read from JSON:
//! ```ignore
//! let config = LoaderConfig::from_json(r#"{
//!     "manifest_filename": "train.tsv",
//!     "block_size": 1000,
//!     "shuffle_manifest": true
//! }"#)?;
//! ```

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::manifest::ManifestOptions;

/// Configuration for the pipeline
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Manifest to read (ignored when `remote` is set)
    pub manifest_filename: Option<PathBuf>,
    /// Directory relative FILE paths of the manifest are joined to
    pub manifest_root: Option<PathBuf>,
    /// Root under which block caches are created (no caching if unset)
    pub cache_directory: Option<PathBuf>,
    /// Target number of records per block. Default: 5000
    pub block_size: usize,
    /// Number of records per batch. Default: 1
    pub batch_size: usize,
    /// Shuffle records at load time and the block order on every pass
    pub shuffle_manifest: bool,
    /// Fraction of the manifest to use, in (0, 1]. Default: 1.0
    pub subset_fraction: f64,
    /// Seed for subsetting and shuffling. Default: 0
    pub random_seed: u64,
    /// Read blocks from a remote collection instead of a manifest
    pub remote: Option<RemoteSourceConfig>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            manifest_filename: None,
            manifest_root: None,
            cache_directory: None,
            block_size: 5000,
            batch_size: 1,
            shuffle_manifest: false,
            subset_fraction: 1.0,
            random_seed: 0,
            remote: None,
        }
    }
}

fn default_shard_count() -> usize {
    1
}

/// Endpoint and shard of a remote collection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSourceConfig {
    /// Base URL of the server
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub collection_id: String,
    /// Number of shards the collection is split into. Default: 1
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    /// Shard read by this process. Default: 0
    #[serde(default)]
    pub shard_index: usize,
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Parses a JSON object; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid loader config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to load config {}", path.display()))
    }

    /// Checks the settings for consistency.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.block_size > 0, "block_size must be > 0");
        ensure!(self.batch_size > 0, "batch_size must be > 0");
        ensure!(
            self.subset_fraction > 0.0 && self.subset_fraction <= 1.0,
            "subset_fraction must be in (0, 1], got {}",
            self.subset_fraction
        );

        match &self.remote {
            Some(remote) => {
                ensure!(!remote.url.is_empty(), "remote url must not be empty");
                ensure!(remote.shard_count > 0, "shard_count must be > 0");
                ensure!(
                    remote.shard_index < remote.shard_count,
                    "shard_index {} out of range for shard_count {}",
                    remote.shard_index,
                    remote.shard_count
                );
            }
            None if self.manifest_filename.is_none() => {
                bail!("either manifest_filename or remote must be set")
            }
            None => {}
        }
        Ok(())
    }

    /// Manifest loading options implied by this config.
    pub fn manifest_options(&self) -> ManifestOptions {
        let mut options = ManifestOptions::default()
            .shuffle(self.shuffle_manifest)
            .subset_fraction(self.subset_fraction)
            .block_size(self.block_size)
            .seed(self.random_seed);
        if let Some(root) = &self.manifest_root {
            options = options.root(root);
        }
        options
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    pub fn manifest_filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.manifest_filename = Some(path.into());
        self
    }

    pub fn manifest_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.manifest_root = Some(path.into());
        self
    }

    /// Enable the block cache under `path`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_directory = Some(path.into());
        self
    }

    /// Set the target block size (must be > 0)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn shuffle_manifest(mut self, shuffle: bool) -> Self {
        self.config.shuffle_manifest = shuffle;
        self
    }

    pub fn subset_fraction(mut self, fraction: f64) -> Self {
        self.config.subset_fraction = fraction;
        self
    }

    /// Set the random seed for reproducible subsetting and shuffling.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    pub fn remote(mut self, remote: RemoteSourceConfig) -> Self {
        self.config.remote = Some(remote);
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
