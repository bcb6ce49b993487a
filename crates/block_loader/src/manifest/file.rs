//! src/manifest/file.rs
//!
//! Parsing of a manifest file into typed columns and blocks.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use super::{
    generate_block_list, BlockInfo, BlockSequence, ElementType, COMMENT_MARKER, DELIMITER,
    METADATA_MARKER, SUBSET_SEED_OFFSET,
};
use crate::error::LoaderError;

/// One manifest line: the text of every column.
pub type Record = Vec<String>;

/// Options applied while a manifest is loaded.
///
/// ```ignore
/// let options = ManifestOptions::default()
///     .block_size(1000)
///     .shuffle(true)
///     .seed(42);
/// let manifest = ManifestFile::open("train.tsv", &options)?;
/// ```
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    /// Shuffle the records before partitioning, and the block order on
    /// every reset.
    pub shuffle: bool,
    /// Directory that relative `FILE` paths are joined to.
    pub root: Option<PathBuf>,
    /// Fraction of the records to keep, in (0, 1].
    pub subset_fraction: f64,
    /// Target number of records per block.
    pub block_size: usize,
    pub seed: u64,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            shuffle: false,
            root: None,
            subset_fraction: 1.0,
            block_size: 5000,
            seed: 0,
        }
    }
}

impl ManifestOptions {
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn subset_fraction(mut self, fraction: f64) -> Self {
        self.subset_fraction = fraction;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A parsed manifest.
///
/// Records, blocks and element types are fixed once loading returns. Only
/// the block load sequence changes, and only through `reset()`.
#[derive(Debug)]
pub struct ManifestFile {
    source_name: String,
    element_types: Vec<ElementType>,
    records: Vec<Record>,
    blocks: Vec<BlockInfo>,
    sequence: BlockSequence,
    crc: OnceLock<u32>,
}

impl ManifestFile {
    /// Loads the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is malformed (see
    /// [`ManifestFile::from_reader`]).
    pub fn open(path: impl AsRef<Path>, options: &ManifestOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open manifest {}", path.display()))?;
        Self::from_reader(BufReader::new(file), &path.to_string_lossy(), options)
            .with_context(|| format!("Failed to load manifest {}", path.display()))
    }

    /// Loads a manifest from any line source.
    ///
    /// # Arguments
    /// * `reader` - manifest text
    /// * `source_name` - name used for `cache_id()` and error messages
    /// * `options` - subsetting, shuffling and partitioning options
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::ManifestFormat`] for a misplaced or repeated
    /// type header, an unknown type token or a line whose column count
    /// differs from the others.
    pub fn from_reader<R: BufRead>(
        reader: R,
        source_name: &str,
        options: &ManifestOptions,
    ) -> Result<Self> {
        anyhow::ensure!(options.block_size > 0, "block_size must be > 0");
        anyhow::ensure!(
            options.subset_fraction > 0.0 && options.subset_fraction <= 1.0,
            "subset_fraction must be in (0, 1], got {}",
            options.subset_fraction
        );

        let (element_types, mut records) = parse(reader, options.root.as_deref())?;
        let parsed = records.len();

        if options.subset_fraction < 1.0 {
            records = subset(records, options.subset_fraction, options.seed);
        }
        if options.shuffle {
            let mut rng = StdRng::seed_from_u64(options.seed);
            records.shuffle(&mut rng);
        }

        let blocks = generate_block_list(records.len(), options.block_size);
        let sequence = BlockSequence::new(blocks.len(), options.shuffle, options.seed);

        debug!(
            source = source_name,
            parsed,
            kept = records.len(),
            blocks = blocks.len(),
            "manifest loaded"
        );

        Ok(Self {
            source_name: source_name.to_string(),
            element_types,
            records,
            blocks,
            sequence,
            crc: OnceLock::new(),
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn element_types(&self) -> &[ElementType] {
        &self.element_types
    }

    pub fn elements_per_record(&self) -> usize {
        self.element_types.len()
    }

    /// Largest number of records in any block.
    pub fn block_size(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.count)
    }

    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    /// Records of block `index` (block list order, not load order).
    pub fn block(&self, index: usize) -> Option<&[Record]> {
        let info = self.blocks.get(index)?;
        Some(&self.records[info.start..info.end()])
    }

    /// Record at global position `offset`.
    pub fn record(&self, offset: usize) -> Option<&Record> {
        self.records.get(offset)
    }

    /// Next block of the current pass as `(block index, records)`.
    ///
    /// Returns `None` at the end of the pass; call `reset()` to begin the
    /// next one.
    pub fn next(&mut self) -> Option<(usize, &[Record])> {
        let index = self.sequence.next()?;
        let info = self.blocks[index];
        Some((index, &self.records[info.start..info.end()]))
    }

    /// Starts a new pass, reshuffling the block order if shuffling is on.
    pub fn reset(&mut self) {
        self.sequence.reset();
    }

    pub fn sequence(&self) -> &BlockSequence {
        &self.sequence
    }

    /// CRC-32 over every element of every record, in block order.
    pub fn crc(&self) -> u32 {
        *self.crc.get_or_init(|| {
            let mut hasher = crc32fast::Hasher::new();
            for record in &self.records {
                for element in record {
                    hasher.update(element.as_bytes());
                }
            }
            hasher.finalize()
        })
    }

    /// `crc()` as 8 hex digits.
    pub fn version(&self) -> String {
        format!("{:08x}", self.crc())
    }

    /// Hash of the name the manifest was loaded from.
    pub fn cache_id(&self) -> u32 {
        crc32fast::hash(self.source_name.as_bytes())
    }
}

fn format_error(line: usize, message: String) -> LoaderError {
    LoaderError::ManifestFormat { line, message }
}

fn parse<R: BufRead>(reader: R, root: Option<&Path>) -> Result<(Vec<ElementType>, Vec<Record>)> {
    let mut declared: Option<Vec<ElementType>> = None;
    let mut width: Option<usize> = None;
    let mut records: Vec<Record> = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.with_context(|| format!("Failed to read manifest line {}", line_number))?;
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix(METADATA_MARKER) {
            if declared.is_some() {
                bail!(format_error(line_number, "duplicate type header".to_string()));
            }
            if !records.is_empty() {
                bail!(format_error(
                    line_number,
                    "type header must come before the first record".to_string()
                ));
            }
            let mut types = Vec::new();
            for token in header.split(DELIMITER) {
                match ElementType::from_token(token) {
                    Some(ty) => types.push(ty),
                    None => bail!(format_error(
                        line_number,
                        format!("unknown element type '{}'", token)
                    )),
                }
            }
            width = Some(types.len());
            declared = Some(types);
            continue;
        }

        if line.starts_with(COMMENT_MARKER) {
            continue;
        }

        let columns: Record = line.split(DELIMITER).map(str::to_string).collect();
        match width {
            None => width = Some(columns.len()),
            Some(expected) if expected != columns.len() => {
                bail!(format_error(
                    line_number,
                    format!(
                        "found {} elements, expected {}: [{}]",
                        columns.len(),
                        expected,
                        columns.join(", ")
                    )
                ));
            }
            Some(_) => {}
        }
        records.push(columns);
    }

    let element_types =
        declared.unwrap_or_else(|| vec![ElementType::File; width.unwrap_or_default()]);

    if let Some(root) = root {
        let file_columns: Vec<usize> = element_types
            .iter()
            .enumerate()
            .filter(|(_, ty)| **ty == ElementType::File)
            .map(|(i, _)| i)
            .collect();
        for record in &mut records {
            for &column in &file_columns {
                let joined = root.join(&record[column]);
                record[column] = joined.to_string_lossy().into_owned();
            }
        }
    }

    Ok((element_types, records))
}

/// Keeps exactly `floor(len * fraction)` records, chosen by seeded Bernoulli
/// draws. Once the records left equal the records still needed, all of them
/// are taken.
fn subset(records: Vec<Record>, fraction: f64, seed: u64) -> Vec<Record> {
    let total = records.len();
    let expected = (total as f64 * fraction).floor() as usize;
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(SUBSET_SEED_OFFSET));

    let mut needed = expected;
    let mut kept = Vec::with_capacity(expected);
    for (index, record) in records.into_iter().enumerate() {
        if needed == 0 {
            break;
        }
        let remaining = total - index;
        if needed == remaining || rng.random_bool(fraction) {
            kept.push(record);
            needed -= 1;
        }
    }
    kept
}
