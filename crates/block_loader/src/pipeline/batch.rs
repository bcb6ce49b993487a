//! src/pipeline/batch.rs
//!
//! Re-slices blocks into fixed-size batches of records.

use anyhow::{ensure, Result};
use std::vec;
use tracing::trace;

use super::{AsyncManager, BlockStream, Fill};
use crate::record::{EncodedRecord, EncodedRecordList};

struct BatchFill<B> {
    upstream: B,
    batch_size: usize,
    pending: vec::IntoIter<EncodedRecord>,
    records_this_pass: usize,
}

impl<B: BlockStream> Fill for BatchFill<B> {
    type Buffer = EncodedRecordList;

    fn fill(&mut self, batch: &mut EncodedRecordList) -> Result<bool> {
        batch.clear();
        while batch.len() < self.batch_size {
            if let Some(record) = self.pending.next() {
                batch.push_record(record);
                continue;
            }
            let next = match self.upstream.next_block() {
                Ok(next) => next,
                Err(e) => {
                    // Records gathered so far go out with the next batch.
                    self.pending = batch.take_records().into_iter();
                    return Err(e);
                }
            };
            match next {
                Some(block) => {
                    self.records_this_pass += block.len();
                    self.pending = block.take_records().into_iter();
                }
                None => {
                    if self.records_this_pass == 0 {
                        // A whole pass without records: nothing will ever come.
                        return Ok(false);
                    }
                    trace!(records = self.records_this_pass, "upstream pass boundary");
                    self.records_this_pass = 0;
                }
            }
        }
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.upstream.reset()?;
        self.pending = Vec::new().into_iter();
        self.records_this_pass = 0;
        Ok(())
    }
}

/// Yields batches of exactly `batch_size` records taken from a block
/// stream, in block order.
///
/// Batches span block and pass boundaries, so a non-empty upstream gives an
/// endless stream of full batches. Records are moved out of the upstream
/// blocks, never copied. `next()` returns `None` only if the upstream
/// finishes a pass without any record.
///
/// ```ignore
/// let manager = BlockManager::from_config(&config)?;
/// let mut batches = BatchIterator::new(manager, config.batch_size)?;
/// for _ in 0..steps {
///     let batch = batches.next()?.context("empty dataset")?;
///     train_step(batch)?;
/// }
/// ```
pub struct BatchIterator<B: BlockStream> {
    inner: AsyncManager<BatchFill<B>>,
    batch_size: usize,
}

impl<B: BlockStream> BatchIterator<B> {
    pub fn new(upstream: B, batch_size: usize) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be > 0");
        let fill = BatchFill {
            upstream,
            batch_size,
            pending: Vec::new().into_iter(),
            records_this_pass: 0,
        };
        Ok(Self {
            inner: AsyncManager::new("batch-iterator", fill)?,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn next(&mut self) -> Result<Option<&mut EncodedRecordList>> {
        self.inner.next()
    }

    /// Drops buffered records and restarts the upstream pass.
    pub fn reset(&mut self) -> Result<()> {
        self.inner.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestFile, ManifestOptions};
    use crate::source::{BlockLoader, FileBlockSource};
    use std::io::Cursor;

    fn loader(records: usize, block_size: usize) -> Result<BlockLoader<FileBlockSource>> {
        let mut text = String::from("@STRING\n");
        for i in 0..records {
            text.push_str(&format!("{}\n", i));
        }
        let options = ManifestOptions::default().block_size(block_size);
        let manifest = ManifestFile::from_reader(Cursor::new(text), "mem", &options)?;
        BlockLoader::new(FileBlockSource::new(manifest))
    }

    fn ids(batch: &EncodedRecordList) -> Result<Vec<usize>> {
        batch
            .records()
            .iter()
            .map(|r| Ok(std::str::from_utf8(r.element(0)?)?.parse()?))
            .collect()
    }

    #[test]
    fn test_batches_span_blocks_and_passes() -> Result<()> {
        // 10 records in blocks of 4, 4, 2; batches of 3
        let mut batches = BatchIterator::new(loader(10, 4)?, 3)?;
        let mut seen = Vec::new();
        for _ in 0..7 {
            let batch = match batches.next()? {
                Some(batch) => batch,
                None => panic!("stream ended early"),
            };
            assert_eq!(batch.len(), 3);
            seen.extend(ids(batch)?);
        }
        let expected: Vec<usize> = (0..10).chain(0..10).chain(0..1).collect();
        assert_eq!(seen, expected);
        Ok(())
    }

    #[test]
    fn test_batch_larger_than_dataset() -> Result<()> {
        let mut batches = BatchIterator::new(loader(3, 2)?, 7)?;
        let first = batches.next()?.map(|b| ids(b)).transpose()?;
        assert_eq!(first, Some(vec![0, 1, 2, 0, 1, 2, 0]));
        Ok(())
    }

    #[test]
    fn test_empty_upstream_ends() -> Result<()> {
        let mut batches = BatchIterator::new(loader(0, 2)?, 2)?;
        assert!(batches.next()?.is_none());
        Ok(())
    }

    #[test]
    fn test_reset_restarts_from_first_record() -> Result<()> {
        let mut batches = BatchIterator::new(loader(10, 5)?, 4)?;
        assert!(batches.next()?.is_some());
        batches.reset()?;
        let first = batches.next()?.map(|b| ids(b)).transpose()?;
        assert_eq!(first, Some(vec![0, 1, 2, 3]));
        Ok(())
    }

    /// Serves scripted blocks of ids; `None` entries fail to load.
    struct FlakyStream {
        blocks: Vec<Option<Vec<usize>>>,
        position: usize,
        current: EncodedRecordList,
    }

    impl BlockStream for FlakyStream {
        fn next_block(&mut self) -> Result<Option<&mut EncodedRecordList>> {
            let Some(entry) = self.blocks.get(self.position).cloned() else {
                self.position = 0;
                return Ok(None);
            };
            self.position += 1;
            let ids = entry.ok_or_else(|| anyhow::anyhow!("block {} failed", self.position - 1))?;
            self.current.clear();
            for id in ids {
                let mut record = EncodedRecord::new();
                record.push_data(id.to_string().into_bytes());
                self.current.push_record(record);
            }
            Ok(Some(&mut self.current))
        }

        fn reset(&mut self) -> Result<()> {
            self.position = 0;
            Ok(())
        }
    }

    #[test]
    fn test_failed_block_keeps_gathered_records() -> Result<()> {
        let stream = FlakyStream {
            blocks: vec![Some(vec![0, 1]), None, Some(vec![4, 5])],
            position: 0,
            current: EncodedRecordList::new(),
        };
        let mut batches = BatchIterator::new(stream, 3)?;

        assert!(batches.next().is_err());
        let second = batches.next()?.map(|b| ids(b)).transpose()?;
        assert_eq!(second, Some(vec![0, 1, 4]));
        let third = batches.next()?.map(|b| ids(b)).transpose()?;
        assert_eq!(third, Some(vec![5, 0, 1]));
        Ok(())
    }

    #[test]
    fn test_zero_batch_size_rejected() -> Result<()> {
        assert!(BatchIterator::new(loader(3, 2)?, 0).is_err());
        Ok(())
    }
}
