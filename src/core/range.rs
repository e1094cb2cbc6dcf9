// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Partitioning of an input into contiguous blocks.

use crate::error::{Error, Result};

/// A partition of the range `0..len` into contiguous, near-equal blocks.
///
/// The number of blocks is the requested number capped by `len`, so that no
/// block is empty. With `base = len / num_blocks` and
/// `remainder = len % num_blocks`, the first `remainder` blocks contain
/// `base + 1` items and the others contain `base` items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Effective number of blocks.
    num_blocks: usize,
    /// Total number of items.
    len: usize,
}

impl Partition {
    /// Partitions `0..len` into at most `num_blocks` blocks.
    ///
    /// Fails with [`Error::InvalidThreadCount`] if `num_blocks` is zero.
    pub fn new(num_blocks: usize, len: usize) -> Result<Self> {
        if num_blocks == 0 {
            return Err(Error::InvalidThreadCount);
        }
        Ok(Self {
            num_blocks: num_blocks.min(len),
            len,
        })
    }

    /// Returns the effective number of blocks, which is zero for an empty
    /// input.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Returns the total number of items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the partitioned range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the range of the block at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `id` isn't smaller than [`num_blocks()`](Self::num_blocks).
    pub fn block(&self, id: usize) -> std::ops::Range<usize> {
        assert!(
            id < self.num_blocks,
            "block index {id} out of range for a partition into {} blocks",
            self.num_blocks
        );
        let base = self.len / self.num_blocks;
        let remainder = self.len % self.num_blocks;
        let start = id * base + id.min(remainder);
        let end = start + base + usize::from(id < remainder);
        start..end
    }

    /// Returns an iterator over the blocks, ordered by start index.
    pub fn blocks(&self) -> impl ExactSizeIterator<Item = std::ops::Range<usize>> + '_ {
        (0..self.num_blocks).map(move |id| self.block(id))
    }
}

/// Splits `0..len` into at most `num_blocks` contiguous ranges, as described
/// in [`Partition`].
///
/// ```rust
/// # use paramapper::block_ranges;
/// assert_eq!(block_ranges(3, 8).unwrap(), vec![0..3, 3..6, 6..8]);
/// assert_eq!(block_ranges(4, 2).unwrap(), vec![0..1, 1..2]);
/// assert!(block_ranges(4, 0).unwrap().is_empty());
/// assert!(block_ranges(0, 10).is_err());
/// ```
pub fn block_ranges(num_blocks: usize, len: usize) -> Result<Vec<std::ops::Range<usize>>> {
    Ok(Partition::new(num_blocks, len)?.blocks().collect())
}

/// Splits a slice into at most `num_blocks` contiguous sub-slices, as
/// described in [`Partition`].
///
/// ```rust
/// # use paramapper::split;
/// let values = [1, 2, 3, 4, 5, 6, 7];
/// let blocks = split(3, &values).unwrap();
/// assert_eq!(blocks, vec![&[1, 2, 3][..], &[4, 5][..], &[6, 7][..]]);
/// ```
pub fn split<T>(num_blocks: usize, values: &[T]) -> Result<Vec<&[T]>> {
    Ok(Partition::new(num_blocks, values.len())?
        .blocks()
        .map(|range| &values[range])
        .collect())
}
