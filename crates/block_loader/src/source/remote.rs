//! src/source/remote.rs
//!
//! Block source over one shard of a remote collection.
//!
//! The server exposes two endpoints:
//!
//! ```text
//! GET <url>/object_count/?macro_batch_max_size=&collection_id=&shard_count=&shard_index=&token=
//!     -> {"record_count": N, "macro_batch_per_shard": M}
//! GET <url>/macrobatch/?macro_batch_index=&macro_batch_max_size=&collection_id=&shard_count=&shard_index=&token=
//!     -> one block, an encoded record list
//! ```
//!
//! Query values are percent-encoded. Metadata is fetched once when
//! connecting. Blocks are fetched on demand by the fill thread that owns the
//! source.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::BlockSource;
use crate::config::RemoteSourceConfig;
use crate::error::LoaderError;
use crate::manifest::BlockSequence;
use crate::record::EncodedRecordList;

/// Request timeout for metadata and block fetches.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn default_element_count() -> usize {
    2
}

/// Shard description returned by the `object_count` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteMetadata {
    pub record_count: usize,
    pub macro_batch_per_shard: usize,
    #[serde(default = "default_element_count")]
    pub element_count: usize,
}

/// Fetches pre-encoded blocks over HTTP.
pub struct RemoteBlockSource {
    client: Client,
    config: RemoteSourceConfig,
    metadata_endpoint: Url,
    block_endpoint: Url,
    block_size: usize,
    metadata: RemoteMetadata,
    sequence: BlockSequence,
    uid: u32,
}

impl RemoteBlockSource {
    /// Connects to the collection and fetches its shard metadata.
    ///
    /// # Arguments
    /// * `config` - endpoint, token, collection and shard
    /// * `block_size` - maximum records per block, sent with every request
    /// * `shuffle` - reshuffle the block order on every reset
    /// * `seed` - seed for the block order
    ///
    /// # Errors
    ///
    /// Returns an error if `config.url` is not a valid base URL,
    /// [`LoaderError::Transport`] or [`LoaderError::HttpStatus`] if the
    /// metadata request fails, or an error if its body is not the expected
    /// JSON.
    pub fn connect(
        config: RemoteSourceConfig,
        block_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(format!("block_loader/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let base = Url::parse(&format!("{}/", config.url.trim_end_matches('/')))
            .with_context(|| format!("Invalid remote url '{}'", config.url))?;
        let metadata_endpoint = base.join("object_count/")?;
        let block_endpoint = base.join("macrobatch/")?;

        // keyed on every parameter that selects blocks
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(config.url.as_bytes());
        hasher.update(config.collection_id.as_bytes());
        hasher.update(&(config.shard_count as u64).to_le_bytes());
        hasher.update(&(config.shard_index as u64).to_le_bytes());
        hasher.update(&(block_size as u64).to_le_bytes());
        let uid = hasher.finalize();

        let mut source = Self {
            client,
            config,
            metadata_endpoint,
            block_endpoint,
            block_size,
            metadata: RemoteMetadata {
                record_count: 0,
                macro_batch_per_shard: 0,
                element_count: default_element_count(),
            },
            sequence: BlockSequence::new(0, shuffle, seed),
            uid,
        };

        let url = source.metadata_url();
        let body = source.get(&url)?;
        let metadata: RemoteMetadata = serde_json::from_slice(&body)
            .with_context(|| format!("Invalid metadata returned by '{}'", url))?;

        info!(
            records = metadata.record_count,
            blocks = metadata.macro_batch_per_shard,
            shard = source.config.shard_index,
            shard_count = source.config.shard_count,
            "remote metadata fetched"
        );

        source.sequence = BlockSequence::new(metadata.macro_batch_per_shard, shuffle, seed);
        source.metadata = metadata;
        Ok(source)
    }

    pub fn metadata(&self) -> &RemoteMetadata {
        &self.metadata
    }

    /// Appends the parameters shared by both endpoints.
    fn append_shard_params(&self, url: &mut Url) {
        url.query_pairs_mut()
            .append_pair("macro_batch_max_size", &self.block_size.to_string())
            .append_pair("collection_id", &self.config.collection_id)
            .append_pair("shard_count", &self.config.shard_count.to_string())
            .append_pair("shard_index", &self.config.shard_index.to_string())
            .append_pair("token", &self.config.token);
    }

    pub fn metadata_url(&self) -> String {
        let mut url = self.metadata_endpoint.clone();
        self.append_shard_params(&mut url);
        url.into()
    }

    pub fn block_url(&self, index: usize) -> String {
        let mut url = self.block_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("macro_batch_index", &index.to_string());
        self.append_shard_params(&mut url);
        url.into()
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let transport = |e: reqwest::Error| LoaderError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().map_err(transport)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(LoaderError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        let body = response.bytes().map_err(transport)?;
        Ok(body.to_vec())
    }
}

impl BlockSource for RemoteBlockSource {
    fn record_count(&self) -> usize {
        self.metadata.record_count
    }

    fn block_count(&self) -> usize {
        self.metadata.macro_batch_per_shard
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn elements_per_record(&self) -> usize {
        self.metadata.element_count
    }

    fn uid(&self) -> u32 {
        self.uid
    }

    fn next_block_index(&mut self) -> Option<usize> {
        self.sequence.next()
    }

    fn reset(&mut self) {
        self.sequence.reset();
    }

    fn load_block(&self, index: usize, block: &mut EncodedRecordList) -> Result<()> {
        let url = self.block_url(index);
        let body = self.get(&url)?;
        *block = EncodedRecordList::from_bytes(&body)
            .with_context(|| format!("Invalid block payload returned by '{}'", url))?;
        debug!(block = index, records = block.len(), "remote block fetched");
        Ok(())
    }
}
