// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! OFS and FFS volumes.
//!
//! A [`Volume`] owns a [`BlockStore`] and keeps the root block, the bitmap
//! and every directory hash table consistent while files and directories
//! are added or removed. New entries always go into the current directory.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info};

use crate::adf_blk::{
    BitmapBlock, BitmapExtBlock, Block, BlockKind, BootBlock, DataBlock, FfsDataBlock,
    FileHeaderBlock, FileListBlock, OfsDataBlock, RootBlock, UserDirBlock,
};
use crate::adf_err::{FsError, Result};
use crate::adf_str::{FsComment, FsName};
use crate::adf_time::FsTime;
use crate::bitmap::{self, Bitmap};
use crate::checksum::boot_checksum;
use crate::codec;
use crate::consts::*;
use crate::hash_table::{self, HashTable};
use crate::store::BlockStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FsType {
    Ofs,
    Ffs,
}

impl FsType {
    /// Flags byte stored after "DOS" in the boot record.
    pub fn dos_flags(self, intl: bool) -> u8 {
        let ffs = match self {
            FsType::Ofs => 0,
            FsType::Ffs => DOSFLAG_FFS,
        };
        if intl {
            ffs | DOSFLAG_INTL
        } else {
            ffs
        }
    }

    pub fn from_dos_flags(flags: u8) -> (FsType, bool) {
        let fs_type = if flags & DOSFLAG_FFS != 0 {
            FsType::Ffs
        } else {
            FsType::Ofs
        };
        (fs_type, flags & DOSFLAG_INTL != 0)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsType::Ofs => f.write_str("OFS"),
            FsType::Ffs => f.write_str("FFS"),
        }
    }
}

impl FromStr for FsType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OFS" => Ok(FsType::Ofs),
            "FFS" => Ok(FsType::Ffs),
            other => Err(format!("unknown file system type '{other}'")),
        }
    }
}

/// Parameters for a freshly formatted volume.
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    pub fs_type: FsType,
    pub capacity: u32,
    pub block_size: u32,
    pub name: String,
    pub intl: bool,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        VolumeConfig {
            fs_type: FsType::Ffs,
            capacity: DEFAULT_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
            name: DEFAULT_VOLUME_NAME.to_string(),
            intl: false,
        }
    }
}

impl VolumeConfig {
    pub fn with_fs_type(mut self, fs_type: FsType) -> Self {
        self.fs_type = fs_type;
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_intl(mut self, intl: bool) -> Self {
        self.intl = intl;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    Dir,
    File,
}

/// One line of a directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    pub block: u32,
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: u32,
    pub protection: u32,
    pub modified: FsTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub fs_type: FsType,
    pub intl: bool,
    pub capacity: u32,
    pub block_size: u32,
    pub free_blocks: u32,
    pub used_blocks: u32,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub created: FsTime,
    pub modified: FsTime,
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name:        {}", self.name)?;
        writeln!(
            f,
            "Type:        {}{}",
            self.fs_type,
            if self.intl { " (INTL)" } else { "" }
        )?;
        writeln!(f, "Blocks:      {} x {} bytes", self.capacity, self.block_size)?;
        writeln!(f, "Used:        {} blocks ({} bytes)", self.used_blocks, self.used_bytes)?;
        writeln!(f, "Free:        {} blocks ({} bytes)", self.free_blocks, self.free_bytes)?;
        writeln!(f, "Created:     {}", self.created)?;
        write!(f, "Modified:    {}", self.modified)
    }
}

#[derive(Debug, Clone)]
pub struct Volume {
    fs_type: FsType,
    intl: bool,
    capacity: u32,
    bsize: u32,
    dsize: u32,
    store: BlockStore,
    current_dir: u32,
}

impl Volume {
    /// Formats an empty volume: root block, bitmap blocks and bitmap
    /// extension blocks, everything else free.
    pub fn new(config: VolumeConfig) -> Result<Self> {
        let VolumeConfig {
            fs_type,
            capacity,
            block_size: bsize,
            name,
            intl,
        } = config;

        if bsize < 512 || !bsize.is_power_of_two() {
            return Err(FsError::InvalidGeometry(format!(
                "block size {bsize} is not a power of two >= 512"
            )));
        }
        let (pages, ext) = bitmap::layout(capacity, bsize);
        let root_nr = capacity / 2;
        let first_free = root_nr as usize + 1 + pages + ext;
        if capacity < 8 || first_free > capacity as usize {
            return Err(FsError::InvalidGeometry(format!(
                "{capacity} blocks cannot hold the root and bitmap blocks"
            )));
        }

        let mut store = BlockStore::new(capacity, bsize);
        let ht = codec::table_size(bsize as usize);
        let words = (bsize / 4) as usize;
        let page_nrs: Vec<u32> = (0..pages as u32).map(|i| root_nr + 1 + i).collect();
        let ext_nrs: Vec<u32> = (0..ext as u32)
            .map(|i| root_nr + 1 + pages as u32 + i)
            .collect();

        let now = FsTime::now();
        let mut bm_pages = vec![0; BM_PAGES_IN_ROOT];
        for (slot, &nr) in bm_pages.iter_mut().zip(page_nrs.iter()) {
            *slot = nr;
        }
        store.put(
            root_nr,
            Block::Root(RootBlock {
                nr: root_nr,
                checksum: 0,
                name: FsName::new(&name)?,
                hash_table: HashTable::new(ht),
                bm_flag: BM_FLAG_VALID,
                bm_pages,
                bm_ext: ext_nrs.first().copied().unwrap_or(0),
                modified: now,
                disk_modified: now,
                created: now,
                extension: 0,
                raw: Vec::new(),
            }),
        )?;

        for &nr in &page_nrs {
            store.put(
                nr,
                Block::Bitmap(BitmapBlock {
                    nr,
                    checksum: 0,
                    words: vec![0; words - 1],
                }),
            )?;
        }

        let overflow: Vec<u32> = page_nrs.iter().skip(BM_PAGES_IN_ROOT).copied().collect();
        let mut refs = overflow.chunks(words - 1);
        for (i, &nr) in ext_nrs.iter().enumerate() {
            let mut pages = refs.next().map(|c| c.to_vec()).unwrap_or_default();
            pages.resize(words - 1, 0);
            store.put(
                nr,
                Block::BitmapExt(BitmapExtBlock {
                    nr,
                    pages,
                    next: ext_nrs.get(i + 1).copied().unwrap_or(0),
                }),
            )?;
        }

        store.set_bitmap(Bitmap::new(capacity, bsize, page_nrs, ext_nrs));
        for nr in BOOT_BLOCKS..capacity {
            let used = nr >= root_nr && (nr as usize) < first_free;
            store.mark(nr, !used)?;
        }
        store.seal_all();

        info!(%fs_type, capacity, bsize, "formatted volume");
        Ok(Self::from_store(fs_type, intl, store))
    }

    pub(crate) fn from_store(fs_type: FsType, intl: bool, store: BlockStore) -> Self {
        let capacity = store.capacity();
        let bsize = store.block_size();
        Volume {
            fs_type,
            intl,
            capacity,
            bsize,
            dsize: codec::data_capacity(fs_type, bsize as usize) as u32,
            store,
            current_dir: capacity / 2,
        }
    }

    pub fn fs_type(&self) -> FsType {
        self.fs_type
    }

    pub fn is_ofs(&self) -> bool {
        self.fs_type == FsType::Ofs
    }

    pub fn is_ffs(&self) -> bool {
        self.fs_type == FsType::Ffs
    }

    pub fn is_intl(&self) -> bool {
        self.intl
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn block_size(&self) -> u32 {
        self.bsize
    }

    /// Payload bytes per data block.
    pub fn data_block_capacity(&self) -> u32 {
        self.dsize
    }

    pub fn root_nr(&self) -> u32 {
        self.capacity / 2
    }

    pub fn bitmap_nr(&self) -> u32 {
        self.capacity / 2 + 1
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut BlockStore {
        &mut self.store
    }

    pub fn block(&self, nr: u32) -> Result<&Block> {
        self.store.at(nr)
    }

    pub fn root(&self) -> Result<&RootBlock> {
        self.store.typed::<RootBlock>(self.root_nr())
    }

    pub fn name(&self) -> String {
        self.root().map(|r| r.name.to_string()).unwrap_or_default()
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let name = FsName::new(name)?;
        let root_nr = self.root_nr();
        let root = self.store.typed_mut::<RootBlock>(root_nr)?;
        root.name = name;
        root.disk_modified = FsTime::now();
        self.store.seal(root_nr)
    }

    pub fn free_blocks(&self) -> u32 {
        self.store.count_free()
    }

    pub fn used_blocks(&self) -> u32 {
        self.capacity - self.free_blocks()
    }

    pub fn info(&self) -> Result<VolumeInfo> {
        let root = self.root()?;
        let free = self.free_blocks();
        let used = self.capacity - free;
        let bsize = self.bsize as u64;
        Ok(VolumeInfo {
            name: root.name.to_string(),
            fs_type: self.fs_type,
            intl: self.intl,
            capacity: self.capacity,
            block_size: self.bsize,
            free_blocks: free,
            used_blocks: used,
            total_bytes: self.capacity as u64 * bsize,
            free_bytes: free as u64 * bsize,
            used_bytes: used as u64 * bsize,
            created: root.created,
            modified: root.disk_modified,
        })
    }

    //
    // Directories
    //

    pub fn current_dir(&self) -> u32 {
        self.current_dir
    }

    pub(crate) fn set_current_dir(&mut self, nr: u32) {
        self.current_dir = nr;
    }

    pub fn current_dir_block(&self) -> Result<&Block> {
        self.store.at(self.current_dir)
    }

    /// Looks `name` up in the current directory.
    pub fn seek(&self, name: &str) -> Result<Option<u32>> {
        self.seek_name(&FsName::new(name)?)
    }

    fn seek_name(&self, name: &FsName) -> Result<Option<u32>> {
        hash_table::lookup(&self.store, self.current_dir, name, self.intl)
    }

    /// Enters a subdirectory of the current directory. `"/"` goes to the
    /// root, `".."` to the parent.
    pub fn change_dir(&mut self, name: &str) -> Result<u32> {
        let target = match name {
            "/" => self.root_nr(),
            ".." => match self.store.at(self.current_dir)? {
                Block::UserDir(dir) => dir.parent,
                _ => self.root_nr(),
            },
            _ => {
                let nr = self
                    .seek(name)?
                    .ok_or_else(|| FsError::NotFound(name.to_string()))?;
                if !self.store.at(nr)?.is_directory() {
                    return Err(FsError::NotADirectory(name.to_string()));
                }
                nr
            }
        };
        self.current_dir = target;
        Ok(target)
    }

    /// Absolute path of the item stored in block `nr`.
    pub fn path_of(&self, nr: u32) -> Result<String> {
        let mut parts = Vec::new();
        let mut visited = HashSet::new();
        let mut cur = nr;
        while cur != self.root_nr() {
            if !visited.insert(cur) {
                return Err(FsError::Inconsistent {
                    nr: cur,
                    detail: "parent chain loops back".to_string(),
                });
            }
            let block = self.store.at(cur)?;
            let (name, parent) = match (block.name(), block.parent()) {
                (Some(name), Some(parent)) => (name.to_string(), parent),
                _ => return Err(FsError::expected(cur, BlockKind::UserDir, block.kind())),
            };
            parts.push(name);
            cur = parent;
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    pub fn path(&self) -> Result<String> {
        self.path_of(self.current_dir)
    }

    fn touch_dir(&mut self, dir: u32) -> Result<()> {
        self.store.at_mut(dir)?.touch(FsTime::now());
        self.store.seal(dir)
    }

    /// Claims a block for the operation in progress and remembers it for
    /// rollback.
    fn claim(&mut self, claimed: &mut Vec<u32>) -> Result<u32> {
        let nr = self.store.allocate()?;
        claimed.push(nr);
        Ok(nr)
    }

    fn rollback(&mut self, claimed: &[u32]) {
        for &nr in claimed.iter().rev() {
            if let Err(err) = self.store.free(nr) {
                tracing::error!(nr, %err, "rollback could not free block");
            }
        }
        debug!(blocks = claimed.len(), "rolled back allocation");
    }

    /// Creates a subdirectory in the current directory.
    pub fn make_dir(&mut self, name: &str) -> Result<u32> {
        let name = FsName::new(name)?;
        if self.seek_name(&name)?.is_some() {
            return Err(FsError::NameExists(name.to_string()));
        }

        let mut claimed = Vec::new();
        let result = self.build_dir(name, &mut claimed);
        if result.is_err() {
            self.rollback(&claimed);
        }
        result
    }

    fn build_dir(&mut self, name: FsName, claimed: &mut Vec<u32>) -> Result<u32> {
        let nr = self.claim(claimed)?;
        let parent = self.current_dir;
        self.store.put(
            nr,
            Block::UserDir(UserDirBlock {
                nr,
                checksum: 0,
                name,
                comment: FsComment::default(),
                protection: 0,
                modified: FsTime::now(),
                hash_table: HashTable::new(codec::table_size(self.bsize as usize)),
                hash_chain: 0,
                parent,
                extension: 0,
                raw: Vec::new(),
            }),
        )?;
        self.store.seal(nr)?;
        hash_table::insert(&mut self.store, parent, nr, self.intl)?;
        self.touch_dir(parent)?;
        debug!(nr, parent, "created directory");
        Ok(nr)
    }

    /// Creates a file with the given contents in the current directory.
    ///
    /// On failure every block claimed for the file is released again.
    pub fn make_file(&mut self, name: &str, data: &[u8]) -> Result<u32> {
        let name = FsName::new(name)?;
        if self.seek_name(&name)?.is_some() {
            return Err(FsError::NameExists(name.to_string()));
        }

        let mut claimed = Vec::new();
        let result = self.build_file(name, data, &mut claimed);
        if result.is_err() {
            self.rollback(&claimed);
        }
        result
    }

    fn build_file(&mut self, name: FsName, data: &[u8], claimed: &mut Vec<u32>) -> Result<u32> {
        let bsize = self.bsize as usize;
        let dsize = self.dsize as usize;
        let ht = codec::table_size(bsize);
        let chunks: Vec<&[u8]> = data.chunks(dsize).collect();
        let byte_size = u32::try_from(data.len())
            .map_err(|_| FsError::InvalidGeometry(format!("{} bytes exceed a file", data.len())))?;

        let header = self.claim(claimed)?;
        let mut lists = Vec::new();
        let mut blocks = Vec::with_capacity(chunks.len());
        for i in 0..chunks.len() {
            if i >= ht && i % ht == 0 {
                lists.push(self.claim(claimed)?);
            }
            blocks.push(self.claim(claimed)?);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let nr = blocks[i];
            let mut payload = chunk.to_vec();
            payload.resize(dsize, 0);
            let block = match self.fs_type {
                FsType::Ofs => DataBlock::Ofs(OfsDataBlock {
                    nr,
                    checksum: 0,
                    header,
                    seq_num: i as u32 + 1,
                    data_size: chunk.len() as u32,
                    next: blocks.get(i + 1).copied().unwrap_or(0),
                    payload,
                }),
                FsType::Ffs => DataBlock::Ffs(FfsDataBlock { nr, payload }),
            };
            self.store.put(nr, Block::Data(block))?;
            self.store.seal(nr)?;
        }

        let mut extents = blocks.chunks(ht);
        let head_extents = extents.next().map(|c| c.to_vec()).unwrap_or_default();
        for (j, (&nr, chunk)) in lists.iter().zip(extents).enumerate() {
            self.store.put(
                nr,
                Block::FileList(FileListBlock {
                    nr,
                    checksum: 0,
                    extents: chunk.to_vec(),
                    parent: header,
                    next: lists.get(j + 1).copied().unwrap_or(0),
                    raw: Vec::new(),
                }),
            )?;
            self.store.seal(nr)?;
        }

        let parent = self.current_dir;
        self.store.put(
            header,
            Block::FileHeader(FileHeaderBlock {
                nr: header,
                checksum: 0,
                name,
                comment: FsComment::default(),
                protection: 0,
                modified: FsTime::now(),
                byte_size,
                first_data: blocks.first().copied().unwrap_or(0),
                extents: head_extents,
                hash_chain: 0,
                parent,
                extension: lists.first().copied().unwrap_or(0),
                raw: Vec::new(),
            }),
        )?;
        self.store.seal(header)?;
        hash_table::insert(&mut self.store, parent, header, self.intl)?;
        self.touch_dir(parent)?;
        debug!(
            header,
            data_blocks = blocks.len(),
            list_blocks = lists.len(),
            "created file"
        );
        Ok(header)
    }

    /// Data blocks and file list blocks of the file whose header is `nr`,
    /// both in file order.
    pub fn file_blocks(&self, nr: u32) -> Result<(Vec<u32>, Vec<u32>)> {
        let header = self.store.typed::<FileHeaderBlock>(nr)?;
        let mut data = header.extents.clone();
        let mut lists = Vec::new();
        let mut visited = HashSet::new();
        let mut next = header.extension;
        while next != 0 {
            if !visited.insert(next) || visited.len() > self.capacity as usize {
                return Err(FsError::Inconsistent {
                    nr: next,
                    detail: "file list chain loops back".to_string(),
                });
            }
            let list = self.store.typed::<FileListBlock>(next)?;
            lists.push(next);
            data.extend_from_slice(&list.extents);
            next = list.next;
        }
        Ok((data, lists))
    }

    /// Reassembles the contents of the file whose header is `nr`.
    pub fn read_file(&self, nr: u32) -> Result<Vec<u8>> {
        let size = self.store.typed::<FileHeaderBlock>(nr)?.byte_size as usize;
        let (data, _) = self.file_blocks(nr)?;
        let mut contents = Vec::with_capacity(size);
        for (i, &block_nr) in data.iter().enumerate() {
            match self.store.typed::<DataBlock>(block_nr)? {
                DataBlock::Ofs(b) => {
                    if b.seq_num != i as u32 + 1 || b.header != nr {
                        return Err(FsError::Inconsistent {
                            nr: block_nr,
                            detail: format!("data block out of sequence ({})", b.seq_num),
                        });
                    }
                    let len = (b.data_size as usize).min(b.payload.len());
                    contents.extend_from_slice(&b.payload[..len]);
                }
                DataBlock::Ffs(b) => contents.extend_from_slice(&b.payload),
            }
        }
        contents.truncate(size);
        Ok(contents)
    }

    /// Removes a file or an empty directory from the current directory.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let fs_name = FsName::new(name)?;
        let nr = self
            .seek_name(&fs_name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        let mut doomed = vec![nr];
        match self.store.at(nr)? {
            Block::UserDir(dir) => {
                if !dir.hash_table.is_empty() {
                    return Err(FsError::DirectoryNotEmpty(name.to_string()));
                }
            }
            Block::FileHeader(_) => {
                let (data, lists) = self.file_blocks(nr)?;
                doomed.extend(data);
                doomed.extend(lists);
            }
            other => return Err(FsError::expected(nr, BlockKind::FileHeader, other.kind())),
        }

        let parent = self.current_dir;
        hash_table::remove(&mut self.store, parent, &fs_name, self.intl)?;
        for block in doomed {
            self.store.free(block)?;
        }
        self.touch_dir(parent)?;
        debug!(nr, parent, "deleted entry");
        Ok(())
    }

    //
    // Traversal
    //

    /// Block numbers reachable from the hash table of directory `start`,
    /// bucket by bucket, each chain in insertion order. Nested directories
    /// are expanded right after their own entry if `recursive` is set.
    ///
    /// Entries already visited are skipped; if that happened the
    /// collected list is still filled and `Inconsistent` is returned.
    pub fn collect_into(&self, start: u32, list: &mut Vec<u32>, recursive: bool) -> Result<()> {
        if !self.store.at(start)?.is_directory() {
            return Err(FsError::NotADirectory(self.path_of(start).unwrap_or_default()));
        }
        let mut visited = HashSet::from([start]);
        let mut problem = None;
        self.collect_dir(start, list, recursive, &mut visited, &mut problem)?;
        match problem {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn collect(&self, start: u32, recursive: bool) -> Result<Vec<u32>> {
        let mut list = Vec::new();
        self.collect_into(start, &mut list, recursive)?;
        Ok(list)
    }

    fn collect_dir(
        &self,
        dir: u32,
        list: &mut Vec<u32>,
        recursive: bool,
        visited: &mut HashSet<u32>,
        problem: &mut Option<FsError>,
    ) -> Result<()> {
        let slots = match self.store.at(dir)?.hash_table() {
            Some(table) => table.slots().to_vec(),
            None => return Ok(()),
        };

        for head in slots {
            let mut nr = head;
            while nr != 0 {
                if nr >= self.capacity {
                    problem.get_or_insert(FsError::Inconsistent {
                        nr: dir,
                        detail: format!("reference to block {nr} beyond the volume"),
                    });
                    break;
                }
                if !visited.insert(nr) {
                    problem.get_or_insert(FsError::Inconsistent {
                        nr,
                        detail: "block reached twice while collecting".to_string(),
                    });
                    break;
                }
                let block = self.store.at(nr)?;
                let Some(next) = block.hash_chain() else {
                    problem.get_or_insert(FsError::Inconsistent {
                        nr,
                        detail: format!("{} linked into a directory", block.kind()),
                    });
                    break;
                };
                list.push(nr);
                if recursive && matches!(block, Block::UserDir(_)) {
                    self.collect_dir(nr, list, recursive, visited, problem)?;
                }
                nr = next;
            }
        }
        Ok(())
    }

    /// Lists the current directory.
    pub fn list(&self, recursive: bool) -> Result<Vec<DirEntryInfo>> {
        let refs = self.collect(self.current_dir, recursive)?;
        refs.into_iter().map(|nr| self.entry_info(nr)).collect()
    }

    pub fn entry_info(&self, nr: u32) -> Result<DirEntryInfo> {
        let path = self.path_of(nr)?;
        match self.store.at(nr)? {
            Block::UserDir(b) => Ok(DirEntryInfo {
                block: nr,
                path,
                name: b.name.to_string(),
                kind: EntryKind::Dir,
                size: 0,
                protection: b.protection,
                modified: b.modified,
            }),
            Block::FileHeader(b) => Ok(DirEntryInfo {
                block: nr,
                path,
                name: b.name.to_string(),
                kind: EntryKind::File,
                size: b.byte_size,
                protection: b.protection,
                modified: b.modified,
            }),
            other => Err(FsError::expected(nr, BlockKind::FileHeader, other.kind())),
        }
    }

    //
    // Boot block and checksums
    //

    /// Writes the two-sector boot record with standard boot code.
    pub fn install_boot_block(&mut self) -> Result<()> {
        let bsize = self.bsize as usize;
        let mut record = vec![0u8; 2 * bsize];
        record[..3].copy_from_slice(BOOT_SIGNATURE);
        record[3] = self.fs_type.dos_flags(self.intl);
        record[BOOT_ROOT_OFFSET..BOOT_ROOT_OFFSET + 4]
            .copy_from_slice(&self.root_nr().to_be_bytes());
        record[BOOT_CODE_OFFSET..BOOT_CODE_OFFSET + STD_BOOT_CODE.len()]
            .copy_from_slice(&STD_BOOT_CODE);
        let sum = boot_checksum(&record);
        record[BOOT_CHECKSUM_OFFSET..BOOT_CHECKSUM_OFFSET + 4].copy_from_slice(&sum.to_be_bytes());

        for (nr, sector) in record.chunks(bsize).enumerate() {
            self.store.put(
                nr as u32,
                Block::Boot(BootBlock {
                    nr: nr as u32,
                    data: sector.to_vec(),
                }),
            )?;
        }
        info!(checksum = sum, "installed boot block");
        Ok(())
    }

    /// Concatenated boot record, `None` if no boot block is installed.
    pub fn boot_record(&self) -> Option<Vec<u8>> {
        let mut record = Vec::with_capacity(2 * self.bsize as usize);
        for nr in 0..BOOT_BLOCKS {
            match self.store.at(nr).ok()? {
                Block::Boot(b) => record.extend_from_slice(&b.data),
                _ => return None,
            }
        }
        Some(record)
    }

    /// Recomputes the checksum of every block, the boot record included.
    pub fn update_checksums(&mut self) {
        self.store.seal_all();
        if let Some(mut record) = self.boot_record() {
            let sum = boot_checksum(&record);
            record[BOOT_CHECKSUM_OFFSET..BOOT_CHECKSUM_OFFSET + 4]
                .copy_from_slice(&sum.to_be_bytes());
            if let Ok(Block::Boot(b)) = self.store.at_mut(0) {
                let len = b.data.len().min(record.len());
                b.data[..len].copy_from_slice(&record[..len]);
            }
        }
    }
}
