//! Free-space bookkeeping for chunk placement.
//!
//! During layout recomputation each host file gets a transient list of
//! empty blocks (closed byte intervals, the last one unbounded). Fixed
//! offset chunks carve their exact region out first; the packer then
//! places the remaining chunks first-fit, aligning large chunks to
//! [`ALIGNMENT_BOUNDARY`]. After placement, whatever intervals remain are
//! the gaps to zero and the tail to truncate.

use crate::error::{fail, MriError, Result};
use crate::types::{ALIGNMENT_BOUNDARY, ALIGNMENT_THRESHOLD};

/// Unbounded upper end of the final block.
pub(crate) const OPEN_END: u64 = u64::MAX;

/// A maximal run of unreserved bytes, ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EmptyBlock {
    pub start: u64,
    pub end: u64,
}

impl EmptyBlock {
    fn holds(&self, size: u64) -> bool {
        // `size - 1 <= end - start` avoids overflow on the open-ended block.
        size > 0 && size - 1 <= self.end - self.start
    }
}

/// Ordered free list for one host file.
#[derive(Debug)]
pub(crate) struct EmptyBlockList {
    blocks: Vec<EmptyBlock>,
}

impl EmptyBlockList {
    /// A single unbounded block starting at `start` (the header size for
    /// the header file, 0 otherwise).
    pub fn new(start: u64) -> EmptyBlockList {
        EmptyBlockList { blocks: vec![EmptyBlock { start, end: OPEN_END }] }
    }

    /// Removes `[offset, offset + size)` from the free list, splitting any
    /// block it lands inside. Reserving space that is already taken is
    /// permitted and simply removes the still-free parts.
    pub fn reserve(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        let last = offset + size - 1;
        let mut i = 0;
        while i < self.blocks.len() {
            let blk = self.blocks[i];
            if offset <= blk.end && last >= blk.start {
                self.blocks.remove(i);
                if blk.start < offset {
                    self.blocks.insert(i, EmptyBlock { start: blk.start, end: offset - 1 });
                    i += 1;
                }
                if blk.end > last {
                    self.blocks.insert(i, EmptyBlock { start: last + 1, end: blk.end });
                    i += 1;
                }
            } else {
                i += 1;
            }
        }
    }

    /// Chooses the first block that can hold `size` bytes, honoring the
    /// large-chunk alignment rule, reserves the region, and returns its
    /// offset.
    pub fn reserve_first_fit(&mut self, size: u64) -> Result<u64> {
        let mut chosen = None;
        for blk in &self.blocks {
            if !blk.holds(size) {
                continue;
            }
            if size >= ALIGNMENT_THRESHOLD {
                let aligned = blk.start.div_ceil(ALIGNMENT_BOUNDARY) * ALIGNMENT_BOUNDARY;
                // The aligned region must still fit inside this block.
                if size - 1 > blk.end - aligned {
                    continue;
                }
                chosen = Some(aligned);
            } else {
                chosen = Some(blk.start);
            }
            break;
        }
        match chosen {
            Some(offset) => {
                self.reserve(offset, size);
                Ok(offset)
            }
            None => fail(MriError::Allocation(
                "cannot allocate file space for chunk".into(),
            )),
        }
    }

    /// Remaining free intervals, ascending. The final one (and only the
    /// final one) may be open-ended.
    pub fn blocks(&self) -> &[EmptyBlock] {
        &self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_packing_from_the_start() {
        let mut list = EmptyBlockList::new(512);
        assert_eq!(list.reserve_first_fit(100).unwrap(), 512);
        assert_eq!(list.reserve_first_fit(50).unwrap(), 612);
        assert_eq!(list.blocks().len(), 1);
        assert_eq!(list.blocks()[0].start, 662);
    }

    #[test]
    fn fixed_reservation_splits_a_block() {
        let mut list = EmptyBlockList::new(0);
        list.reserve(100, 50);
        let blocks = list.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].start, blocks[0].end), (0, 99));
        assert_eq!(blocks[1].start, 150);
        assert_eq!(blocks[1].end, OPEN_END);
        // First-fit takes the hole before the fixed region when it fits.
        assert_eq!(list.reserve_first_fit(80).unwrap(), 0);
        assert_eq!(list.reserve_first_fit(40).unwrap(), 150);
    }

    #[test]
    fn small_chunks_skip_holes_that_are_too_small() {
        let mut list = EmptyBlockList::new(0);
        list.reserve(10, 1000);
        assert_eq!(list.reserve_first_fit(20).unwrap(), 1010);
    }

    #[test]
    fn large_chunks_are_aligned() {
        let mut list = EmptyBlockList::new(512);
        let offset = list.reserve_first_fit(ALIGNMENT_THRESHOLD).unwrap();
        assert_eq!(offset, ALIGNMENT_BOUNDARY);
        assert_eq!(offset % ALIGNMENT_BOUNDARY, 0);
        // A small chunk still fits in the skipped prefix.
        assert_eq!(list.reserve_first_fit(100).unwrap(), 512);
    }

    #[test]
    fn alignment_rule_respects_block_bounds() {
        let mut list = EmptyBlockList::new(0);
        // Free hole exactly [16384, 16384 + threshold) plus open tail far out.
        list.reserve(0, ALIGNMENT_BOUNDARY);
        list.reserve(
            ALIGNMENT_BOUNDARY + ALIGNMENT_THRESHOLD,
            ALIGNMENT_BOUNDARY - 1,
        );
        let offset = list.reserve_first_fit(ALIGNMENT_THRESHOLD).unwrap();
        assert_eq!(offset, ALIGNMENT_BOUNDARY);
    }

    #[test]
    fn overlapping_reserve_is_tolerated() {
        let mut list = EmptyBlockList::new(0);
        list.reserve(0, 100);
        list.reserve(50, 100);
        assert_eq!(list.reserve_first_fit(10).unwrap(), 150);
    }
}
