//! src/manifest/block.rs

/// A contiguous range of manifest records loaded and cached as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub start: usize,
    pub count: usize,
}

impl BlockInfo {
    pub fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    /// One past the last record of the block.
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// Partitions `record_count` records into blocks of roughly `block_size`.
///
/// The number of blocks is `round(record_count / block_size)` (at least one
/// for a non-empty manifest). Every block but the last holds
/// `ceil(record_count / block_count)` records and the last one takes what is
/// left, so the blocks cover every record in ascending, contiguous order.
///
/// Block sizes are not guaranteed to be within one of each other: the last
/// block can be much smaller, e.g. 10 records with `block_size` 4 give
/// blocks of 4, 4 and 2. Callers that need balanced blocks must not rely on
/// this partition.
///
/// # Example
/// ```ignore
/// let blocks = generate_block_list(1003, 335);
/// // (0, 335), (335, 335), (670, 333)
/// ```
pub fn generate_block_list(record_count: usize, block_size: usize) -> Vec<BlockInfo> {
    if record_count == 0 {
        return Vec::new();
    }
    let block_size = block_size.max(1);

    // round-half-up in integer arithmetic
    let block_count = ((record_count + block_size / 2) / block_size).max(1);
    let size = record_count.div_ceil(block_count);

    let mut blocks = Vec::with_capacity(block_count);
    let mut start = 0;
    while start < record_count {
        let count = size.min(record_count - start);
        blocks.push(BlockInfo::new(start, count));
        start += count;
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(blocks: &[BlockInfo]) -> Vec<usize> {
        blocks.iter().map(|b| b.count).collect()
    }

    fn assert_covers(blocks: &[BlockInfo], record_count: usize) {
        let mut expected_start = 0;
        for block in blocks {
            assert_eq!(block.start, expected_start);
            assert!(block.count > 0);
            expected_start = block.end();
        }
        assert_eq!(expected_start, record_count);
    }

    #[test]
    fn test_uneven_split() {
        let blocks = generate_block_list(1003, 335);
        assert_eq!(
            blocks,
            vec![
                BlockInfo::new(0, 335),
                BlockInfo::new(335, 335),
                BlockInfo::new(670, 333)
            ]
        );
    }

    #[test]
    fn test_small_manifest_is_one_block() {
        assert_eq!(generate_block_list(20, 5000), vec![BlockInfo::new(0, 20)]);
        assert_eq!(generate_block_list(1, 1), vec![BlockInfo::new(0, 1)]);
    }

    #[test]
    fn test_empty_manifest_has_no_blocks() {
        assert!(generate_block_list(0, 10).is_empty());
    }

    #[test]
    fn test_exact_multiple() {
        let blocks = generate_block_list(12, 4);
        assert_eq!(counts(&blocks), vec![4, 4, 4]);
    }

    #[test]
    fn test_rounding_of_block_count() {
        // 10 / 4 = 2.5 rounds up to 3 blocks
        assert_eq!(counts(&generate_block_list(10, 4)), vec![4, 4, 2]);
        // 9 / 4 = 2.25 rounds down to 2 blocks
        assert_eq!(counts(&generate_block_list(9, 4)), vec![5, 4]);
    }

    #[test]
    fn test_coverage_across_sizes() {
        for record_count in 1..200 {
            for block_size in [1, 2, 3, 7, 16, 50, 333] {
                let blocks = generate_block_list(record_count, block_size);
                assert_covers(&blocks, record_count);
                let largest = blocks[0].count;
                assert!(blocks.iter().all(|b| b.count <= largest));
            }
        }
    }
}
