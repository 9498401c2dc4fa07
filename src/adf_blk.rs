// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;

use serde::Serialize;

use crate::adf_str::{FsComment, FsName};
use crate::adf_time::FsTime;
use crate::hash_table::HashTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockKind {
    Empty,
    Boot,
    Root,
    Bitmap,
    BitmapExt,
    UserDir,
    FileHeader,
    FileList,
    DataOfs,
    DataFfs,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockKind::Empty => "empty block",
            BlockKind::Boot => "boot block",
            BlockKind::Root => "root block",
            BlockKind::Bitmap => "bitmap block",
            BlockKind::BitmapExt => "bitmap extension block",
            BlockKind::UserDir => "user directory block",
            BlockKind::FileHeader => "file header block",
            BlockKind::FileList => "file list block",
            BlockKind::DataOfs => "OFS data block",
            BlockKind::DataFfs => "FFS data block",
        };
        f.write_str(s)
    }
}

/// One sector of the boot record, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootBlock {
    pub nr: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootBlock {
    pub nr: u32,
    pub checksum: u32,
    pub name: FsName,
    pub hash_table: HashTable,
    pub bm_flag: u32,
    pub bm_pages: Vec<u32>,
    pub bm_ext: u32,
    pub modified: FsTime,
    pub disk_modified: FsTime,
    pub created: FsTime,
    pub extension: u32,
    /// Sector as read from disk when it holds bytes outside the fields
    /// above, empty otherwise. Encoding starts from these bytes.
    pub raw: Vec<u8>,
}

/// Allocation map page. Bit set = block free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapBlock {
    pub nr: u32,
    pub checksum: u32,
    pub words: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapExtBlock {
    pub nr: u32,
    pub pages: Vec<u32>,
    pub next: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDirBlock {
    pub nr: u32,
    pub checksum: u32,
    pub name: FsName,
    pub comment: FsComment,
    pub protection: u32,
    pub modified: FsTime,
    pub hash_table: HashTable,
    pub hash_chain: u32,
    pub parent: u32,
    pub extension: u32,
    /// See [`RootBlock::raw`].
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeaderBlock {
    pub nr: u32,
    pub checksum: u32,
    pub name: FsName,
    pub comment: FsComment,
    pub protection: u32,
    pub modified: FsTime,
    pub byte_size: u32,
    pub first_data: u32,
    /// Data block references in file order.
    pub extents: Vec<u32>,
    pub hash_chain: u32,
    pub parent: u32,
    /// First file list block, 0 if none.
    pub extension: u32,
    /// See [`RootBlock::raw`].
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListBlock {
    pub nr: u32,
    pub checksum: u32,
    pub extents: Vec<u32>,
    /// Owning file header.
    pub parent: u32,
    pub next: u32,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfsDataBlock {
    pub nr: u32,
    pub checksum: u32,
    /// Owning file header.
    pub header: u32,
    /// 1-based position of this block in the file.
    pub seq_num: u32,
    pub data_size: u32,
    pub next: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfsDataBlock {
    pub nr: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataBlock {
    Ofs(OfsDataBlock),
    Ffs(FfsDataBlock),
}

impl DataBlock {
    pub fn nr(&self) -> u32 {
        match self {
            DataBlock::Ofs(b) => b.nr,
            DataBlock::Ffs(b) => b.nr,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            DataBlock::Ofs(b) => &b.payload,
            DataBlock::Ffs(b) => &b.payload,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Block {
    #[default]
    Empty,
    Boot(BootBlock),
    Root(RootBlock),
    Bitmap(BitmapBlock),
    BitmapExt(BitmapExtBlock),
    UserDir(UserDirBlock),
    FileHeader(FileHeaderBlock),
    FileList(FileListBlock),
    Data(DataBlock),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Empty => BlockKind::Empty,
            Block::Boot(_) => BlockKind::Boot,
            Block::Root(_) => BlockKind::Root,
            Block::Bitmap(_) => BlockKind::Bitmap,
            Block::BitmapExt(_) => BlockKind::BitmapExt,
            Block::UserDir(_) => BlockKind::UserDir,
            Block::FileHeader(_) => BlockKind::FileHeader,
            Block::FileList(_) => BlockKind::FileList,
            Block::Data(DataBlock::Ofs(_)) => BlockKind::DataOfs,
            Block::Data(DataBlock::Ffs(_)) => BlockKind::DataFfs,
        }
    }

    /// Block number the record was created for, `None` for empty blocks.
    pub fn nr(&self) -> Option<u32> {
        match self {
            Block::Empty => None,
            Block::Boot(b) => Some(b.nr),
            Block::Root(b) => Some(b.nr),
            Block::Bitmap(b) => Some(b.nr),
            Block::BitmapExt(b) => Some(b.nr),
            Block::UserDir(b) => Some(b.nr),
            Block::FileHeader(b) => Some(b.nr),
            Block::FileList(b) => Some(b.nr),
            Block::Data(b) => Some(b.nr()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Block::Empty)
    }

    /// True for blocks that can sit in a directory hash table.
    pub fn is_hashable(&self) -> bool {
        matches!(self, Block::UserDir(_) | Block::FileHeader(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Block::Root(_) | Block::UserDir(_))
    }

    pub fn name(&self) -> Option<&FsName> {
        match self {
            Block::Root(b) => Some(&b.name),
            Block::UserDir(b) => Some(&b.name),
            Block::FileHeader(b) => Some(&b.name),
            _ => None,
        }
    }

    pub fn hash_table(&self) -> Option<&HashTable> {
        match self {
            Block::Root(b) => Some(&b.hash_table),
            Block::UserDir(b) => Some(&b.hash_table),
            _ => None,
        }
    }

    pub fn hash_table_mut(&mut self) -> Option<&mut HashTable> {
        match self {
            Block::Root(b) => Some(&mut b.hash_table),
            Block::UserDir(b) => Some(&mut b.hash_table),
            _ => None,
        }
    }

    pub fn hash_chain(&self) -> Option<u32> {
        match self {
            Block::UserDir(b) => Some(b.hash_chain),
            Block::FileHeader(b) => Some(b.hash_chain),
            _ => None,
        }
    }

    pub fn set_hash_chain(&mut self, next: u32) -> bool {
        match self {
            Block::UserDir(b) => b.hash_chain = next,
            Block::FileHeader(b) => b.hash_chain = next,
            _ => return false,
        }
        true
    }

    pub fn parent(&self) -> Option<u32> {
        match self {
            Block::UserDir(b) => Some(b.parent),
            Block::FileHeader(b) => Some(b.parent),
            Block::FileList(b) => Some(b.parent),
            _ => None,
        }
    }

    pub fn modified(&self) -> Option<FsTime> {
        match self {
            Block::Root(b) => Some(b.modified),
            Block::UserDir(b) => Some(b.modified),
            Block::FileHeader(b) => Some(b.modified),
            _ => None,
        }
    }

    pub fn touch(&mut self, now: FsTime) {
        match self {
            Block::Root(b) => {
                b.modified = now;
                b.disk_modified = now;
            }
            Block::UserDir(b) => b.modified = now,
            Block::FileHeader(b) => b.modified = now,
            _ => {}
        }
    }

    /// Stored checksum, `None` for kinds that carry no standard checksum.
    pub fn checksum(&self) -> Option<u32> {
        match self {
            Block::Root(b) => Some(b.checksum),
            Block::Bitmap(b) => Some(b.checksum),
            Block::UserDir(b) => Some(b.checksum),
            Block::FileHeader(b) => Some(b.checksum),
            Block::FileList(b) => Some(b.checksum),
            Block::Data(DataBlock::Ofs(b)) => Some(b.checksum),
            Block::Empty
            | Block::Boot(_)
            | Block::BitmapExt(_)
            | Block::Data(DataBlock::Ffs(_)) => None,
        }
    }

    /// Sector bytes kept from disk, for kinds that keep them.
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Block::Root(b) => Some(&b.raw),
            Block::UserDir(b) => Some(&b.raw),
            Block::FileHeader(b) => Some(&b.raw),
            Block::FileList(b) => Some(&b.raw),
            _ => None,
        }
    }

    pub(crate) fn raw_mut(&mut self) -> Option<&mut Vec<u8>> {
        match self {
            Block::Root(b) => Some(&mut b.raw),
            Block::UserDir(b) => Some(&mut b.raw),
            Block::FileHeader(b) => Some(&mut b.raw),
            Block::FileList(b) => Some(&mut b.raw),
            _ => None,
        }
    }

    pub(crate) fn set_checksum(&mut self, value: u32) {
        match self {
            Block::Root(b) => b.checksum = value,
            Block::Bitmap(b) => b.checksum = value,
            Block::UserDir(b) => b.checksum = value,
            Block::FileHeader(b) => b.checksum = value,
            Block::FileList(b) => b.checksum = value,
            Block::Data(DataBlock::Ofs(b)) => b.checksum = value,
            Block::Empty
            | Block::Boot(_)
            | Block::BitmapExt(_)
            | Block::Data(DataBlock::Ffs(_)) => {}
        }
    }
}

/// Typed view into a [`Block`], used by `BlockStore::typed`.
pub trait BlockVariant: Sized {
    const NAME: &'static str;

    fn from_block(block: &Block) -> Option<&Self>;
    fn from_block_mut(block: &mut Block) -> Option<&mut Self>;
}

macro_rules! block_variant {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl BlockVariant for $ty {
            const NAME: &'static str = $name;

            fn from_block(block: &Block) -> Option<&Self> {
                match block {
                    Block::$variant(b) => Some(b),
                    _ => None,
                }
            }

            fn from_block_mut(block: &mut Block) -> Option<&mut Self> {
                match block {
                    Block::$variant(b) => Some(b),
                    _ => None,
                }
            }
        }
    };
}

block_variant!(BootBlock, Boot, "boot block");
block_variant!(RootBlock, Root, "root block");
block_variant!(BitmapBlock, Bitmap, "bitmap block");
block_variant!(BitmapExtBlock, BitmapExt, "bitmap extension block");
block_variant!(UserDirBlock, UserDir, "user directory block");
block_variant!(FileHeaderBlock, FileHeader, "file header block");
block_variant!(FileListBlock, FileList, "file list block");

impl BlockVariant for DataBlock {
    const NAME: &'static str = "data block";

    fn from_block(block: &Block) -> Option<&Self> {
        match block {
            Block::Data(b) => Some(b),
            _ => None,
        }
    }

    fn from_block_mut(block: &mut Block) -> Option<&mut Self> {
        match block {
            Block::Data(b) => Some(b),
            _ => None,
        }
    }
}
