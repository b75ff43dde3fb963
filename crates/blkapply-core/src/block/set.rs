//! Block ranges on the target device.
//!
//! A [`BlockSet`] is an ordered list of half-open block ranges parsed from a
//! transfer-list token. Range values are validated lazily: the parser
//! accepts negative or inverted bounds and every I/O walk rejects them.
//! This mirrors the original engine's observable behavior, where malformed
//! input is reported at I/O time rather than parse time.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{Error, Result};

/// One half-open range of blocks: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPair {
    /// First block of the range.
    pub start: i64,
    /// One past the last block of the range.
    pub end: i64,
}

impl BlockPair {
    /// Reject negative or inverted bounds.
    fn check(&self) -> Result<()> {
        if self.start < 0 || self.end < self.start {
            return Err(Error::InvalidRange {
                message: format!("bad block pair {},{}", self.start, self.end),
            });
        }
        Ok(())
    }

    /// Number of blocks covered, zero for malformed pairs.
    pub fn blocks(&self) -> u64 {
        (self.end - self.start).max(0) as u64
    }

    /// True if the two ranges share at least one block.
    pub fn intersects(&self, other: &BlockPair) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Ordered collection of block ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    pairs: Vec<BlockPair>,
}

impl BlockSet {
    /// Build a block set from explicit pairs.
    pub fn from_pairs(pairs: Vec<BlockPair>) -> Self {
        Self { pairs }
    }

    /// Parse a `"count,start,end[,start,end...]"` token.
    ///
    /// `count` is the number of values that follow; it must match, be even
    /// and nonzero. Values themselves are accepted unchecked (see module
    /// docs for the lazy-validation contract).
    pub fn parse(token: &str) -> Result<Self> {
        let mut values = Vec::new();
        for piece in token.split(',') {
            let value: i64 = piece.trim().parse().map_err(|_| Error::Command {
                message: format!("bad block range token {:?}", token),
            })?;
            values.push(value);
        }
        let Some((&declared, rest)) = values.split_first() else {
            return Err(Error::Command {
                message: "empty block range token".into(),
            });
        };
        if declared <= 0 || declared % 2 != 0 || rest.len() as i64 != declared {
            return Err(Error::Command {
                message: format!("block range count mismatch in {:?}", token),
            });
        }
        let pairs = rest
            .chunks_exact(2)
            .map(|pair| BlockPair {
                start: pair[0],
                end: pair[1],
            })
            .collect();
        Ok(Self { pairs })
    }

    /// Number of ranges in the set.
    pub fn range_count(&self) -> usize {
        self.pairs.len()
    }

    /// True if the set holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Total number of blocks across all ranges.
    pub fn total_blocks(&self) -> u64 {
        self.pairs.iter().map(BlockPair::blocks).sum()
    }

    /// Total byte size of the set for a given block size.
    pub fn total_size(&self, block_size: usize) -> usize {
        self.total_blocks() as usize * block_size
    }

    /// The ranges in order. Reverse iteration is `pairs().iter().rev()`.
    pub fn pairs(&self) -> &[BlockPair] {
        &self.pairs
    }

    /// Every block index in order, front to back.
    pub fn blocks_iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.pairs.iter().flat_map(|p| p.start..p.end.max(p.start))
    }

    /// True if any range of `self` intersects any range of `other`.
    pub fn overlaps(&self, other: &BlockSet) -> bool {
        self.pairs
            .iter()
            .any(|a| other.pairs.iter().any(|b| a.intersects(b)))
    }

    fn check(&self) -> Result<()> {
        for pair in &self.pairs {
            pair.check()?;
        }
        Ok(())
    }

    /// Read the content of every range, in order, into `buf`.
    ///
    /// `buf` must hold at least `total_size(block_size)` bytes. Returns the
    /// number of bytes read. Fails on malformed ranges or short reads.
    pub fn read_from(&self, file: &File, buf: &mut [u8], block_size: usize) -> Result<u64> {
        self.check()?;
        let total = self.total_size(block_size);
        if buf.len() < total {
            return Err(Error::InvalidRange {
                message: format!("buffer {} smaller than set size {}", buf.len(), total),
            });
        }
        let mut pos = 0usize;
        for pair in &self.pairs {
            let len = pair.blocks() as usize * block_size;
            let offset = pair.start as u64 * block_size as u64;
            file.read_exact_at(&mut buf[pos..pos + len], offset)?;
            pos += len;
        }
        Ok(pos as u64)
    }

    /// Write `buf` sequentially across every range, in order.
    ///
    /// Returns the number of bytes written. Fails on malformed ranges or
    /// short writes.
    pub fn write_to(&self, file: &File, buf: &[u8], block_size: usize) -> Result<u64> {
        self.check()?;
        let total = self.total_size(block_size);
        if buf.len() < total {
            return Err(Error::InvalidRange {
                message: format!("buffer {} smaller than set size {}", buf.len(), total),
            });
        }
        let mut pos = 0usize;
        for pair in &self.pairs {
            let len = pair.blocks() as usize * block_size;
            let offset = pair.start as u64 * block_size as u64;
            file.write_all_at(&buf[pos..pos + len], offset)?;
            pos += len;
        }
        Ok(pos as u64)
    }

    /// Zero-fill every range of the set.
    pub fn zero_fill(&self, file: &File, block_size: usize) -> Result<()> {
        self.check()?;
        // Bounded scratch buffer; large ranges are filled in slices.
        let zeros = vec![0u8; block_size * 16];
        for pair in &self.pairs {
            let mut remaining = pair.blocks() as usize * block_size;
            let mut offset = pair.start as u64 * block_size as u64;
            while remaining > 0 {
                let len = remaining.min(zeros.len());
                file.write_all_at(&zeros[..len], offset)?;
                offset += len as u64;
                remaining -= len;
            }
        }
        Ok(())
    }

    /// Remap blocks from `src_buf` into `dst_buf`.
    ///
    /// For each block index named by `locs` (in order), copies the block at
    /// that absolute position of `src_buf` to the next sequential position
    /// of `dst_buf`. Used by MOVE to stage an intermediate copy so an
    /// overlapping target never aliases the source view it is written from.
    pub fn move_blocks(
        src_buf: &[u8],
        locs: &BlockSet,
        dst_buf: &mut [u8],
        block_size: usize,
    ) -> Result<()> {
        locs.check()?;
        let needed = locs.total_size(block_size);
        if dst_buf.len() < needed {
            return Err(Error::InvalidRange {
                message: format!("dst buffer {} smaller than {}", dst_buf.len(), needed),
            });
        }
        for (seq, block) in locs.blocks_iter().enumerate() {
            let src_off = block as usize * block_size;
            if src_off + block_size > src_buf.len() {
                return Err(Error::InvalidRange {
                    message: format!("src buffer too small for block {}", block),
                });
            }
            let dst_off = seq * block_size;
            dst_buf[dst_off..dst_off + block_size]
                .copy_from_slice(&src_buf[src_off..src_off + block_size]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BS: usize = 16;

    fn image(blocks: usize) -> (NamedTempFile, File) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; blocks * BS]).unwrap();
        let file = tmp.reopen().unwrap();
        (tmp, file)
    }

    #[test]
    fn parse_counts_values_not_ranges() {
        let set = BlockSet::parse("2,0,1").unwrap();
        assert_eq!(set.range_count(), 1);
        assert_eq!(set.total_blocks(), 1);

        let set = BlockSet::parse("4,0,2,5,9").unwrap();
        assert_eq!(set.range_count(), 2);
        assert_eq!(set.total_blocks(), 2 + 4);
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        assert!(BlockSet::parse("").is_err());
        assert!(BlockSet::parse("x,0,1").is_err());
        assert!(BlockSet::parse("3,0,1,2").is_err()); // odd count
        assert!(BlockSet::parse("2,0").is_err()); // fewer values than declared
        assert!(BlockSet::parse("2,0,1,2").is_err()); // more values than declared
        assert!(BlockSet::parse("0").is_err());
    }

    #[test]
    fn parse_accepts_negative_values_io_rejects_them() {
        // Lazy validation: parse succeeds, the I/O walk fails.
        let set = BlockSet::parse("2,-1,1").unwrap();
        assert_eq!(set.range_count(), 1);

        let (_tmp, file) = image(4);
        let mut buf = vec![0u8; 4 * BS];
        assert!(matches!(
            set.read_from(&file, &mut buf, BS),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            set.write_to(&file, &buf, BS),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            set.zero_fill(&file, BS),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn empty_set_has_zero_size() {
        let set = BlockSet::default();
        assert_eq!(set.range_count(), 0);
        assert_eq!(set.total_blocks(), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = BlockSet::parse("2,0,1").unwrap();
        let b = BlockSet::parse("2,2,3").unwrap();
        let c = BlockSet::parse("2,0,1").unwrap();

        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
    }

    #[test]
    fn overlap_partial_ranges() {
        let a = BlockSet::parse("2,0,5").unwrap();
        let b = BlockSet::parse("4,4,6,10,12").unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));

        let c = BlockSet::parse("2,5,10").unwrap();
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_tmp, file) = image(10);
        let set = BlockSet::parse("4,1,3,7,9").unwrap();

        let data: Vec<u8> = (0..set.total_size(BS)).map(|i| (i % 251) as u8).collect();
        let written = set.write_to(&file, &data, BS).unwrap();
        assert_eq!(written as usize, data.len());

        let mut back = vec![0u8; data.len()];
        let read = set.read_from(&file, &mut back, BS).unwrap();
        assert_eq!(read, written);
        assert_eq!(back, data);
    }

    #[test]
    fn zero_fill_clears_only_named_ranges() {
        let (_tmp, file) = image(4);
        let all = BlockSet::parse("2,0,4").unwrap();
        all.write_to(&file, &vec![0xAA; 4 * BS], BS).unwrap();

        let middle = BlockSet::parse("2,1,3").unwrap();
        middle.zero_fill(&file, BS).unwrap();

        let mut back = vec![0u8; 4 * BS];
        all.read_from(&file, &mut back, BS).unwrap();
        assert!(back[..BS].iter().all(|&b| b == 0xAA));
        assert!(back[BS..3 * BS].iter().all(|&b| b == 0));
        assert!(back[3 * BS..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let (_tmp, file) = image(4);
        let set = BlockSet::parse("2,0,2").unwrap();
        let mut small = vec![0u8; BS];
        assert!(set.read_from(&file, &mut small, BS).is_err());
        assert!(set.write_to(&file, &small, BS).is_err());
    }

    #[test]
    fn move_blocks_gathers_by_absolute_index() {
        // Buffer of 4 blocks: 0,1,2,3 each filled with its index.
        let mut src = vec![0u8; 4 * BS];
        for i in 0..4 {
            src[i * BS..(i + 1) * BS].fill(i as u8);
        }

        // Gather blocks 3 then 0..2 into sequential order.
        let locs = BlockSet::from_pairs(vec![
            BlockPair { start: 3, end: 4 },
            BlockPair { start: 0, end: 2 },
        ]);
        let mut dst = vec![0xFFu8; 3 * BS];
        BlockSet::move_blocks(&src, &locs, &mut dst, BS).unwrap();

        assert!(dst[..BS].iter().all(|&b| b == 3));
        assert!(dst[BS..2 * BS].iter().all(|&b| b == 0));
        assert!(dst[2 * BS..].iter().all(|&b| b == 1));
    }

    #[test]
    fn move_blocks_rejects_out_of_range_source() {
        let src = vec![0u8; 2 * BS];
        let locs = BlockSet::parse("2,1,3").unwrap();
        let mut dst = vec![0u8; 2 * BS];
        assert!(BlockSet::move_blocks(&src, &locs, &mut dst, BS).is_err());
    }
}
