// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use std::collections::BTreeMap;

use crate::adf_blk::{Block, BlockVariant};
use crate::adf_err::{FsError, Result};
use crate::bitmap::Bitmap;
use crate::codec;
use crate::consts::BOOT_BLOCKS;

/// Arena of block records indexed by block number.
///
/// All cross references between blocks are plain block numbers; the store
/// is the only owner of block contents.
#[derive(Debug, Clone)]
pub struct BlockStore {
    blocks: Vec<Block>,
    bsize: u32,
    bitmap: Bitmap,
    /// Sectors that failed to decode and are held as raw data.
    undecodable: BTreeMap<u32, String>,
}

impl BlockStore {
    pub fn new(capacity: u32, bsize: u32) -> Self {
        BlockStore {
            blocks: vec![Block::Empty; capacity as usize],
            bsize,
            bitmap: Bitmap::new(capacity, bsize, Vec::new(), Vec::new()),
            undecodable: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn block_size(&self) -> u32 {
        self.bsize
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub(crate) fn set_bitmap(&mut self, bitmap: Bitmap) {
        self.bitmap = bitmap;
    }

    fn index(&self, nr: u32) -> Result<usize> {
        if nr >= self.capacity() {
            return Err(FsError::OutOfRange {
                nr,
                capacity: self.capacity(),
            });
        }
        Ok(nr as usize)
    }

    pub fn at(&self, nr: u32) -> Result<&Block> {
        let i = self.index(nr)?;
        Ok(&self.blocks[i])
    }

    pub fn at_mut(&mut self, nr: u32) -> Result<&mut Block> {
        let i = self.index(nr)?;
        Ok(&mut self.blocks[i])
    }

    /// Returns block `nr` as record type `V`.
    pub fn typed<V: BlockVariant>(&self, nr: u32) -> Result<&V> {
        let block = self.at(nr)?;
        V::from_block(block).ok_or_else(|| FsError::TypeMismatch {
            nr,
            detail: format!("expected {}, found {}", V::NAME, block.kind()),
        })
    }

    pub fn typed_mut<V: BlockVariant>(&mut self, nr: u32) -> Result<&mut V> {
        let i = self.index(nr)?;
        let kind = self.blocks[i].kind();
        V::from_block_mut(&mut self.blocks[i]).ok_or_else(|| FsError::TypeMismatch {
            nr,
            detail: format!("expected {}, found {kind}", V::NAME),
        })
    }

    /// Stores a record without touching the bitmap.
    pub fn put(&mut self, nr: u32, block: Block) -> Result<()> {
        let i = self.index(nr)?;
        self.blocks[i] = block;
        self.undecodable.remove(&nr);
        Ok(())
    }

    /// Flags block `nr` as a sector that could not be decoded. The flag is
    /// dropped as soon as another record is stored there.
    pub(crate) fn set_undecodable(&mut self, nr: u32, reason: String) {
        self.undecodable.insert(nr, reason);
    }

    /// Why block `nr` could not be decoded, if it could not.
    pub fn undecodable(&self, nr: u32) -> Option<&str> {
        self.undecodable.get(&nr).map(String::as_str)
    }

    pub fn undecodable_blocks(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.undecodable.iter().map(|(&nr, reason)| (nr, reason.as_str()))
    }

    /// Recomputes the checksum of block `nr`.
    pub fn seal(&mut self, nr: u32) -> Result<()> {
        let bsize = self.bsize as usize;
        codec::seal(self.at_mut(nr)?, bsize);
        Ok(())
    }

    pub fn seal_all(&mut self) {
        let bsize = self.bsize as usize;
        for block in &mut self.blocks {
            codec::seal(block, bsize);
        }
    }

    /// Claims the lowest free block. Its content stays empty until the
    /// caller stores a record there.
    pub fn allocate(&mut self) -> Result<u32> {
        let (nr, page) = self.bitmap.allocate(&mut self.blocks)?;
        self.seal(page)?;
        Ok(nr)
    }

    /// Resets block `nr` to empty and marks it free.
    pub fn free(&mut self, nr: u32) -> Result<()> {
        let i = self.index(nr)?;
        let page = self.bitmap.free(&mut self.blocks, nr)?;
        self.blocks[i] = Block::Empty;
        self.undecodable.remove(&nr);
        self.seal(page)
    }

    /// Marks block `nr` used or free in the bitmap without changing it.
    pub fn mark(&mut self, nr: u32, free: bool) -> Result<()> {
        self.bitmap.mark(&mut self.blocks, nr, free)
    }

    pub fn is_free(&self, nr: u32) -> Result<bool> {
        self.bitmap.is_free(&self.blocks, nr)
    }

    pub fn count_free(&self) -> u32 {
        self.bitmap.count_free(&self.blocks)
    }

    /// Blocks holding a record, plus the reserved boot blocks.
    pub fn live_blocks(&self) -> u32 {
        let reserved = BOOT_BLOCKS.min(self.capacity());
        let used = self
            .blocks
            .iter()
            .skip(reserved as usize)
            .filter(|b| !b.is_empty())
            .count() as u32;
        reserved + used
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Block)> + '_ {
        self.blocks.iter().enumerate().map(|(i, b)| (i as u32, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adf_blk::{BitmapBlock, FileListBlock, RootBlock};

    #[test]
    fn out_of_range_access_fails() {
        let store = BlockStore::new(16, 512);
        assert!(matches!(
            store.at(16),
            Err(FsError::OutOfRange { nr: 16, capacity: 16 })
        ));
        assert!(store.at(15).is_ok());
    }

    #[test]
    fn typed_access_checks_the_variant() {
        let mut store = BlockStore::new(16, 512);
        store
            .put(
                5,
                Block::FileList(FileListBlock {
                    nr: 5,
                    checksum: 0,
                    extents: vec![6],
                    parent: 4,
                    next: 0,
                    raw: Vec::new(),
                }),
            )
            .unwrap();
        assert_eq!(store.typed::<FileListBlock>(5).unwrap().parent, 4);
        assert!(matches!(
            store.typed::<RootBlock>(5),
            Err(FsError::TypeMismatch { nr: 5, .. })
        ));
        store.typed_mut::<FileListBlock>(5).unwrap().next = 9;
        assert_eq!(store.typed::<FileListBlock>(5).unwrap().next, 9);
    }

    #[test]
    fn storing_a_record_clears_the_undecodable_mark() {
        let mut store = BlockStore::new(16, 512);
        store.set_undecodable(7, "unknown block type 4660/0".to_string());
        assert_eq!(store.undecodable(7), Some("unknown block type 4660/0"));
        assert_eq!(store.undecodable_blocks().count(), 1);
        store.put(7, Block::Empty).unwrap();
        assert_eq!(store.undecodable(7), None);
    }

    #[test]
    fn allocate_and_free_keep_counts_balanced() {
        let mut store = BlockStore::new(32, 512);
        store
            .put(
                8,
                Block::Bitmap(BitmapBlock {
                    nr: 8,
                    checksum: 0,
                    words: vec![0; 127],
                }),
            )
            .unwrap();
        store.set_bitmap(Bitmap::new(32, 512, vec![8], vec![]));
        for nr in 2..32 {
            store.mark(nr, nr != 8).unwrap();
        }
        assert_eq!(store.count_free() + store.live_blocks(), 32);

        let nr = store.allocate().unwrap();
        assert_eq!(nr, 2);
        store
            .put(
                nr,
                Block::FileList(FileListBlock {
                    nr,
                    checksum: 0,
                    extents: vec![],
                    parent: 0,
                    next: 0,
                    raw: Vec::new(),
                }),
            )
            .unwrap();
        assert_eq!(store.count_free() + store.live_blocks(), 32);

        store.free(nr).unwrap();
        assert!(store.at(nr).unwrap().is_empty());
        assert!(store.is_free(nr).unwrap());
        assert_eq!(store.count_free() + store.live_blocks(), 32);
    }
}
