// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! Free-space map.
//!
//! The map is spread over bitmap blocks whose numbers are listed in the
//! root block (first 25) and in a chain of bitmap extension blocks. Bit
//! `i` describes block `i + 2`; a set bit means the block is free.

use tracing::{debug, warn};

use crate::adf_blk::Block;
use crate::adf_err::{FsError, Result};
use crate::consts::{BM_PAGES_IN_ROOT, BOOT_BLOCKS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    /// Bitmap block numbers in map order.
    pages: Vec<u32>,
    /// Bitmap extension block numbers in chain order.
    ext_blocks: Vec<u32>,
    capacity: u32,
    bits_per_page: u32,
}

/// Bitmap blocks and extension blocks needed for a volume.
pub fn layout(capacity: u32, bsize: u32) -> (usize, usize) {
    let bits_per_page = (bsize / 4 - 1) * 32;
    let mapped = capacity.saturating_sub(BOOT_BLOCKS);
    let pages = mapped.div_ceil(bits_per_page).max(1) as usize;
    let refs_per_ext = (bsize / 4 - 1) as usize;
    let ext = pages.saturating_sub(BM_PAGES_IN_ROOT).div_ceil(refs_per_ext);
    (pages, ext)
}

impl Bitmap {
    pub fn new(capacity: u32, bsize: u32, pages: Vec<u32>, ext_blocks: Vec<u32>) -> Self {
        Bitmap {
            pages,
            ext_blocks,
            capacity,
            bits_per_page: (bsize / 4 - 1) * 32,
        }
    }

    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn ext_blocks(&self) -> &[u32] {
        &self.ext_blocks
    }

    /// Bitmap block, word index and mask holding the bit of block `nr`.
    fn locate(&self, nr: u32) -> Result<(u32, usize, u32)> {
        if nr < BOOT_BLOCKS || nr >= self.capacity {
            return Err(FsError::OutOfRange {
                nr,
                capacity: self.capacity,
            });
        }
        let bit = nr - BOOT_BLOCKS;
        let page = (bit / self.bits_per_page) as usize;
        let within = bit % self.bits_per_page;
        let page_nr = *self.pages.get(page).ok_or_else(|| FsError::Inconsistent {
            nr,
            detail: "no bitmap block covers this block".to_string(),
        })?;
        Ok((page_nr, (within / 32) as usize, 1 << (within % 32)))
    }

    fn words<'a>(blocks: &'a [Block], page_nr: u32) -> Result<&'a [u32]> {
        match blocks.get(page_nr as usize) {
            Some(Block::Bitmap(b)) => Ok(&b.words),
            Some(other) => Err(FsError::TypeMismatch {
                nr: page_nr,
                detail: format!("expected bitmap block, found {}", other.kind()),
            }),
            None => Err(FsError::OutOfRange {
                nr: page_nr,
                capacity: blocks.len() as u32,
            }),
        }
    }

    fn words_mut<'a>(blocks: &'a mut [Block], page_nr: u32) -> Result<&'a mut Vec<u32>> {
        let capacity = blocks.len() as u32;
        match blocks.get_mut(page_nr as usize) {
            Some(Block::Bitmap(b)) => Ok(&mut b.words),
            Some(other) => Err(FsError::TypeMismatch {
                nr: page_nr,
                detail: format!("expected bitmap block, found {}", other.kind()),
            }),
            None => Err(FsError::OutOfRange {
                nr: page_nr,
                capacity,
            }),
        }
    }

    pub fn is_free(&self, blocks: &[Block], nr: u32) -> Result<bool> {
        let (page_nr, word, mask) = self.locate(nr)?;
        let words = Self::words(blocks, page_nr)?;
        Ok(words.get(word).is_some_and(|w| w & mask != 0))
    }

    /// Sets or clears the bit of block `nr`. The bitmap block is not
    /// resealed here.
    pub fn mark(&self, blocks: &mut [Block], nr: u32, free: bool) -> Result<()> {
        let (page_nr, word, mask) = self.locate(nr)?;
        let words = Self::words_mut(blocks, page_nr)?;
        let slot = words.get_mut(word).ok_or_else(|| FsError::Inconsistent {
            nr: page_nr,
            detail: "bitmap block is truncated".to_string(),
        })?;
        if free {
            *slot |= mask;
        } else {
            *slot &= !mask;
        }
        Ok(())
    }

    /// Claims the lowest-numbered free block and returns it together with
    /// the bitmap block that changed.
    pub fn allocate(&self, blocks: &mut [Block]) -> Result<(u32, u32)> {
        for (page, &page_nr) in self.pages.iter().enumerate() {
            let words = Self::words_mut(blocks, page_nr)?;
            for (i, word) in words.iter_mut().enumerate() {
                if *word == 0 {
                    continue;
                }
                let bit = word.trailing_zeros();
                let nr = BOOT_BLOCKS
                    + page as u32 * self.bits_per_page
                    + i as u32 * 32
                    + bit;
                if nr >= self.capacity {
                    break;
                }
                *word &= !(1 << bit);
                debug!(nr, "allocated block");
                return Ok((nr, page_nr));
            }
        }
        Err(FsError::VolumeFull)
    }

    /// Marks block `nr` free and returns the bitmap block that changed.
    pub fn free(&self, blocks: &mut [Block], nr: u32) -> Result<u32> {
        if self.is_free(blocks, nr)? {
            warn!(nr, "freeing a block that is already free");
        }
        self.mark(blocks, nr, true)?;
        let (page_nr, _, _) = self.locate(nr)?;
        Ok(page_nr)
    }

    pub fn count_free(&self, blocks: &[Block]) -> u32 {
        (BOOT_BLOCKS..self.capacity)
            .filter(|&nr| self.is_free(blocks, nr).unwrap_or(false))
            .count() as u32
    }
}
