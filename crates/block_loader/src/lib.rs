pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod provider;
pub mod record;
pub mod source;

pub use cache::{BlockManager, CacheMode};
pub use config::{LoaderConfig, RemoteSourceConfig};
pub use error::{ElementError, LoaderError};
pub use manifest::{generate_block_list, BlockInfo, ElementType, ManifestFile, ManifestOptions};
pub use pipeline::{AsyncManager, BatchDecoder, BatchIterator, BlockStream, Fill};
pub use provider::{OutputBuffers, Provider};
pub use record::{Element, EncodedRecord, EncodedRecordList};
pub use source::{
    create_block_source, BlockLoader, BlockSource, FileBlockSource, RemoteBlockSource, SourceInfo,
};
