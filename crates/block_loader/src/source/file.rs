//! src/source/file.rs
//!
//! Block source over a local manifest.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::BlockSource;
use crate::error::ElementError;
use crate::manifest::{ElementType, ManifestFile, ManifestOptions};
use crate::record::{EncodedRecord, EncodedRecordList};

/// Loads blocks of a [`ManifestFile`], decoding each column by its type.
///
/// A failure to decode one element (missing file, bad base64, bad number)
/// is stored in that element's slot and does not fail the block.
#[derive(Debug)]
pub struct FileBlockSource {
    manifest: ManifestFile,
    uid: u32,
}

impl FileBlockSource {
    pub fn new(manifest: ManifestFile) -> Self {
        // Partitioning is part of the identity: the same records split into
        // different blocks must not share cached blocks.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&manifest.crc().to_le_bytes());
        hasher.update(&(manifest.block_count() as u64).to_le_bytes());
        let uid = hasher.finalize();
        Self { manifest, uid }
    }

    pub fn open(path: impl AsRef<Path>, options: &ManifestOptions) -> Result<Self> {
        Ok(Self::new(ManifestFile::open(path, options)?))
    }

    pub fn manifest(&self) -> &ManifestFile {
        &self.manifest
    }
}

impl BlockSource for FileBlockSource {
    fn record_count(&self) -> usize {
        self.manifest.record_count()
    }

    fn block_count(&self) -> usize {
        self.manifest.block_count()
    }

    fn block_size(&self) -> usize {
        self.manifest.block_size()
    }

    fn elements_per_record(&self) -> usize {
        self.manifest.elements_per_record()
    }

    fn uid(&self) -> u32 {
        self.uid
    }

    fn next_block_index(&mut self) -> Option<usize> {
        self.manifest.next().map(|(index, _)| index)
    }

    fn reset(&mut self) {
        self.manifest.reset();
    }

    fn load_block(&self, index: usize, block: &mut EncodedRecordList) -> Result<()> {
        let records = self.manifest.block(index).ok_or_else(|| {
            anyhow!(
                "block index {} out of range ({} blocks)",
                index,
                self.manifest.block_count()
            )
        })?;
        let types = self.manifest.element_types();

        block.clear();
        for (offset, record) in records.iter().enumerate() {
            let mut encoded = EncodedRecord::with_capacity(types.len());
            for (column, (ty, value)) in types.iter().zip(record).enumerate() {
                match decode_element(*ty, value) {
                    Ok(bytes) => encoded.push_data(bytes),
                    Err(e) => {
                        debug!(block = index, record = offset, column, error = %e, "deferred element failure");
                        encoded.push_error(ElementError::from(e));
                    }
                }
            }
            block.push_record(encoded);
        }
        Ok(())
    }
}

/// Converts one manifest value into element bytes according to `ty`.
///
/// # Errors
///
/// Fails if the file cannot be read, the base64 is malformed or the number
/// cannot be parsed.
pub fn decode_element(ty: ElementType, value: &str) -> Result<Vec<u8>> {
    match ty {
        ElementType::File => {
            fs::read(value).with_context(|| format!("unable to read file '{}'", value))
        }
        ElementType::Binary => base64::engine::general_purpose::STANDARD
            .decode(value)
            .with_context(|| format!("invalid base64 value '{}'", value)),
        ElementType::String => Ok(value.as_bytes().to_vec()),
        ElementType::AsciiInt => Ok(parse_int(value)?.to_le_bytes().to_vec()),
        ElementType::AsciiFloat => {
            let parsed: f32 = value
                .trim()
                .parse()
                .with_context(|| format!("invalid float value '{}'", value))?;
            Ok(parsed.to_le_bytes().to_vec())
        }
    }
}

/// Integer parse that also accepts decimal notation ("3.0", "1e3"),
/// truncating toward zero.
fn parse_int(value: &str) -> Result<i32> {
    let trimmed = value.trim();
    if let Ok(parsed) = trimmed.parse::<i32>() {
        return Ok(parsed);
    }
    let parsed: f64 = trimmed
        .parse()
        .with_context(|| format!("invalid integer value '{}'", value))?;
    anyhow::ensure!(
        parsed.is_finite() && parsed >= i32::MIN as f64 && parsed < i32::MAX as f64 + 1.0,
        "integer value '{}' out of range",
        value
    );
    Ok(parsed.trunc() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn source(text: &str, block_size: usize) -> Result<FileBlockSource> {
        let options = ManifestOptions::default().block_size(block_size);
        let manifest = ManifestFile::from_reader(Cursor::new(text.to_string()), "mem", &options)?;
        Ok(FileBlockSource::new(manifest))
    }

    mod decoding {
        use super::*;

        #[test]
        fn test_numbers() -> Result<()> {
            assert_eq!(decode_element(ElementType::AsciiInt, "42")?, 42i32.to_le_bytes());
            assert_eq!(decode_element(ElementType::AsciiInt, " -7 ")?, (-7i32).to_le_bytes());
            assert_eq!(decode_element(ElementType::AsciiInt, "3.9")?, 3i32.to_le_bytes());
            assert_eq!(decode_element(ElementType::AsciiFloat, "1.5")?, 1.5f32.to_le_bytes());
            assert!(decode_element(ElementType::AsciiInt, "seven").is_err());
            assert!(decode_element(ElementType::AsciiInt, "1e12").is_err());
            assert!(decode_element(ElementType::AsciiFloat, "").is_err());
            Ok(())
        }

        #[test]
        fn test_binary_and_string() -> Result<()> {
            assert_eq!(decode_element(ElementType::Binary, "aGVsbG8=")?, b"hello");
            assert!(decode_element(ElementType::Binary, "not base64!").is_err());
            assert_eq!(decode_element(ElementType::String, "héllo")?, "héllo".as_bytes());
            Ok(())
        }

        #[test]
        fn test_file_contents() -> Result<()> {
            let mut file = NamedTempFile::new()?;
            file.write_all(b"\x00\x01payload")?;
            let path = file.path().to_string_lossy().into_owned();
            assert_eq!(decode_element(ElementType::File, &path)?, b"\x00\x01payload");

            let err = decode_element(ElementType::File, "/definitely/not/here").unwrap_err();
            assert!(err.to_string().contains("/definitely/not/here"));
            Ok(())
        }
    }

    mod blocks {
        use super::*;

        #[test]
        fn test_failures_are_deferred_per_element() -> Result<()> {
            let src = source("@STRING\tASCII_INT\na\t1\nb\toops\n", 10)?;
            let mut block = EncodedRecordList::new();
            src.load_block(0, &mut block)?;

            assert_eq!(block.len(), 2);
            let good = &block.records()[0];
            assert_eq!(good.element(0)?, b"a");
            assert_eq!(good.element(1)?, 1i32.to_le_bytes());

            let bad = &block.records()[1];
            assert_eq!(bad.element(0)?, b"b");
            let err = bad.element(1).unwrap_err();
            assert!(format!("{:#}", err).contains("oops"));
            Ok(())
        }

        #[test]
        fn test_fill_walks_the_pass() -> Result<()> {
            let mut text = String::from("@STRING\n");
            for i in 0..12 {
                text.push_str(&format!("r{}\n", i));
            }
            let mut src = source(&text, 4)?;
            let mut block = EncodedRecordList::new();

            let mut indices = Vec::new();
            while let Some(index) = src.fill(&mut block)? {
                assert_eq!(block.len(), 4);
                indices.push(index);
            }
            assert_eq!(indices, vec![0, 1, 2]);
            assert!(block.is_empty());

            src.reset();
            assert_eq!(src.fill(&mut block)?, Some(0));
            assert_eq!(block.records()[0].element(0)?, b"r0");
            Ok(())
        }

        #[test]
        fn test_uid_depends_on_partition() -> Result<()> {
            let text = "@STRING\na\nb\nc\nd\n";
            let a = source(text, 2)?;
            let b = source(text, 2)?;
            let c = source(text, 4)?;
            assert_eq!(a.uid(), b.uid());
            assert_ne!(a.uid(), c.uid());
            Ok(())
        }

        #[test]
        fn test_out_of_range_block() -> Result<()> {
            let src = source("@STRING\na\n", 10)?;
            let mut block = EncodedRecordList::new();
            assert!(src.load_block(1, &mut block).is_err());
            Ok(())
        }
    }
}
