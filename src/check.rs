// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! Integrity checker.
//!
//! A non-strict check looks at every block in isolation: type, checksum and
//! the range of each block reference. A strict check also verifies that the
//! structure hangs together: hash buckets, parent and chain pointers, file
//! extents, OFS sequence numbers, the bitmap, and that every used block is
//! reachable from the root. Checking never mutates the volume.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::adf_blk::{Block, BlockKind, DataBlock, FileHeaderBlock};
use crate::adf_err::Result;
use crate::checksum::boot_checksum;
use crate::codec;
use crate::consts::*;
use crate::volume::{FsType, Volume};

/// One field of a block that does not hold the value it should.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub item: String,
    /// Byte offset of the field inside the block.
    pub offset: usize,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at +{}: expected {}, found {}",
            self.item, self.offset, self.expected, self.found
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptedBlock {
    pub nr: u32,
    pub kind: BlockKind,
    pub problems: Vec<Discrepancy>,
}

/// A block whose bitmap bit disagrees with its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitmapMismatch {
    pub nr: u32,
    pub marked_free: bool,
    pub in_use: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub strict: bool,
    /// Blocks with at least one discrepancy, ascending.
    pub corrupted: Vec<CorruptedBlock>,
    /// Used blocks with valid contents that nothing references.
    pub orphaned: Vec<u32>,
    pub bitmap: Vec<BitmapMismatch>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty() && self.orphaned.is_empty() && self.bitmap.is_empty()
    }

    pub fn corrupted_blocks(&self) -> Vec<u32> {
        self.corrupted.iter().map(|c| c.nr).collect()
    }

    pub fn is_corrupted(&self, nr: u32) -> bool {
        self.corrupted.binary_search_by_key(&nr, |c| c.nr).is_ok()
    }

    /// First corrupted block after `nr`.
    pub fn next_corrupted(&self, nr: u32) -> Option<u32> {
        self.corrupted.iter().map(|c| c.nr).find(|&c| c > nr)
    }

    /// Last corrupted block before `nr`.
    pub fn prev_corrupted(&self, nr: u32) -> Option<u32> {
        self.corrupted.iter().rev().map(|c| c.nr).find(|&c| c < nr)
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "No errors found");
        }
        for block in &self.corrupted {
            writeln!(f, "Block {} ({}):", block.nr, block.kind)?;
            for problem in &block.problems {
                writeln!(f, "    {problem}")?;
            }
        }
        for nr in &self.orphaned {
            writeln!(f, "Block {nr}: not reachable from the root")?;
        }
        for m in &self.bitmap {
            let state = if m.marked_free { "free" } else { "used" };
            writeln!(f, "Block {}: marked {state} in the bitmap", m.nr)?;
        }
        write!(
            f,
            "{} corrupted, {} orphaned, {} bitmap mismatches",
            self.corrupted.len(),
            self.orphaned.len(),
            self.bitmap.len()
        )
    }
}

/// What a file expects of one of its data blocks.
#[derive(Debug, Clone, Copy)]
struct DataRef {
    header: u32,
    seq_num: u32,
    next: u32,
}

struct Checker<'a> {
    vol: &'a Volume,
    strict: bool,
    bsize: usize,
    ht: usize,
    data_refs: HashMap<u32, DataRef>,
    list_owners: HashMap<u32, u32>,
    /// Blocks named by hash tables, hash chains and file list links.
    meta_refs: HashSet<u32>,
}

fn push(
    out: &mut Vec<Discrepancy>,
    item: impl Into<String>,
    offset: usize,
    expected: impl fmt::Display,
    found: impl fmt::Display,
) {
    out.push(Discrepancy {
        item: item.into(),
        offset,
        expected: expected.to_string(),
        found: found.to_string(),
    });
}

impl<'a> Checker<'a> {
    fn new(vol: &'a Volume, strict: bool) -> Self {
        let bsize = vol.block_size() as usize;
        let mut checker = Checker {
            vol,
            strict,
            bsize,
            ht: codec::table_size(bsize),
            data_refs: HashMap::new(),
            list_owners: HashMap::new(),
            meta_refs: HashSet::new(),
        };
        checker.index_links();
        if strict {
            checker.index_files();
        }
        checker
    }

    fn index_links(&mut self) {
        for (_, block) in self.vol.store().iter() {
            let links = match block {
                Block::Root(b) => b.hash_table.slots().to_vec(),
                Block::UserDir(b) => {
                    let mut links = b.hash_table.slots().to_vec();
                    links.push(b.hash_chain);
                    links
                }
                Block::FileHeader(b) => vec![b.hash_chain, b.extension],
                Block::FileList(b) => vec![b.next],
                _ => continue,
            };
            self.meta_refs.extend(links.into_iter().filter(|&nr| nr != 0));
        }
    }

    /// Records what every file header expects of its data and list blocks.
    fn index_files(&mut self) {
        for (nr, block) in self.vol.store().iter() {
            if !matches!(block, Block::FileHeader(_)) {
                continue;
            }
            let Ok((data, lists)) = self.vol.file_blocks(nr) else {
                continue;
            };
            for (i, &d) in data.iter().enumerate() {
                self.data_refs.insert(
                    d,
                    DataRef {
                        header: nr,
                        seq_num: i as u32 + 1,
                        next: data.get(i + 1).copied().unwrap_or(0),
                    },
                );
            }
            for l in lists {
                self.list_owners.insert(l, nr);
            }
        }
    }

    fn in_range(
        &self,
        out: &mut Vec<Discrepancy>,
        item: &str,
        offset: usize,
        value: u32,
        optional: bool,
    ) -> bool {
        let capacity = self.vol.capacity();
        if value == 0 && optional {
            return true;
        }
        if value < BOOT_BLOCKS || value >= capacity {
            push(out, item, offset, format!("2..{capacity}"), value);
            return false;
        }
        true
    }

    fn expect_kind(
        &self,
        out: &mut Vec<Discrepancy>,
        item: &str,
        offset: usize,
        nr: u32,
        ok: fn(&Block) -> bool,
        what: &str,
    ) {
        if let Ok(block) = self.vol.block(nr) {
            if !ok(block) {
                push(out, item, offset, what, format!("{} at {nr}", block.kind()));
            }
        }
    }

    fn block(&self, nr: u32) -> Result<Vec<Discrepancy>> {
        let block = self.vol.block(nr)?;
        let mut out = Vec::new();

        if let Some((stored, computed)) = codec::checksums(block, self.bsize) {
            if stored != computed {
                let offset = codec::checksum_offset(block.kind()).unwrap_or(CHECKSUM_OFFSET);
                let expected = format!("{computed:#010x}");
                push(&mut out, "checksum", offset, expected, format!("{stored:#010x}"));
            }
        }

        // Untagged FFS payload only counts as damage where metadata points.
        let undecodable = self.vol.store().undecodable(nr);
        if let Some(reason) = undecodable {
            let damaged = match self.vol.fs_type() {
                FsType::Ofs => !self.vol.store().is_free(nr).unwrap_or(false),
                FsType::Ffs => self.meta_refs.contains(&nr),
            };
            if damaged {
                push(&mut out, "type", TYPE_OFFSET, "known block type", reason);
            }
        }

        let bsize = self.bsize;
        match block {
            Block::Empty => {}
            Block::Boot(_) => self.check_boot(nr, &mut out),
            Block::Root(root) => {
                self.check_table(nr, root.hash_table.slots(), &mut out);
                for (i, &page) in root.bm_pages.iter().enumerate() {
                    let offset = bsize - BM_PAGES_FROM_END + i * 4;
                    if self.in_range(&mut out, "bitmap block", offset, page, true) && page != 0 {
                        let is_page = |b: &Block| matches!(b, Block::Bitmap(_));
                        let what = "bitmap block";
                        self.expect_kind(&mut out, what, offset, page, is_page, what);
                    }
                }
                let ext_offset = bsize - BM_EXT_FROM_END;
                self.in_range(&mut out, "bitmap extension", ext_offset, root.bm_ext, true);
                if self.strict && root.bm_flag != BM_FLAG_VALID {
                    push(
                        &mut out,
                        "bitmap flag",
                        bsize - BM_FLAG_FROM_END,
                        format!("{BM_FLAG_VALID:#010x}"),
                        format!("{:#010x}", root.bm_flag),
                    );
                }
            }
            Block::Bitmap(_) => {}
            Block::BitmapExt(ext) => {
                for (i, &page) in ext.pages.iter().enumerate() {
                    self.in_range(&mut out, "bitmap block", i * 4, page, true);
                }
                self.in_range(&mut out, "next extension", bsize - 4, ext.next, true);
            }
            Block::UserDir(dir) => {
                self.check_table(nr, dir.hash_table.slots(), &mut out);
                self.check_entry(nr, block, &mut out);
            }
            Block::FileHeader(file) => {
                self.check_entry(nr, block, &mut out);
                self.check_file(file, &mut out);
            }
            Block::FileList(list) => {
                for (i, &extent) in list.extents.iter().enumerate() {
                    let offset = HASH_TABLE_OFFSET + (self.ht - 1 - i.min(self.ht - 1)) * 4;
                    self.in_range(&mut out, "data block", offset, extent, false);
                }
                self.in_range(&mut out, "next list", bsize - EXTENSION_FROM_END, list.next, true);
                let parent_offset = bsize - PARENT_FROM_END;
                let parent_ok =
                    self.in_range(&mut out, "file header", parent_offset, list.parent, false);
                if parent_ok && self.strict {
                    let owner = self.list_owners.get(&nr).copied().unwrap_or(0);
                    if owner != 0 && owner != list.parent {
                        push(&mut out, "file header", parent_offset, owner, list.parent);
                    }
                }
            }
            Block::Data(DataBlock::Ofs(data)) => {
                if self.vol.fs_type() != FsType::Ofs {
                    push(&mut out, "type", TYPE_OFFSET, "FFS data", "OFS data");
                }
                let dsize = (bsize - OFS_DATA_HEADER_SIZE) as u32;
                if data.data_size > dsize {
                    let expected = format!("<= {dsize}");
                    push(&mut out, "data size", TABLE_SIZE_OFFSET, expected, data.data_size);
                }
                self.in_range(&mut out, "file header", HEADER_KEY_OFFSET, data.header, false);
                self.in_range(&mut out, "next data block", FIRST_DATA_OFFSET, data.next, true);
                if self.strict {
                    if let Some(exp) = self.data_refs.get(&nr) {
                        if data.header != exp.header {
                            let (exp, found) = (exp.header, data.header);
                            push(&mut out, "file header", HEADER_KEY_OFFSET, exp, found);
                        }
                        if data.seq_num != exp.seq_num {
                            let (exp, found) = (exp.seq_num, data.seq_num);
                            push(&mut out, "sequence number", HIGH_SEQ_OFFSET, exp, found);
                        }
                        if data.next != exp.next {
                            let (exp, found) = (exp.next, data.next);
                            push(&mut out, "next data block", FIRST_DATA_OFFSET, exp, found);
                        }
                    }
                }
            }
            Block::Data(DataBlock::Ffs(_)) => {
                if self.vol.fs_type() == FsType::Ofs && undecodable.is_none() {
                    push(&mut out, "type", TYPE_OFFSET, T_DATA, "untagged block");
                }
            }
        }
        Ok(out)
    }

    fn check_boot(&self, nr: u32, out: &mut Vec<Discrepancy>) {
        if nr != 0 {
            return;
        }
        let Some(record) = self.vol.boot_record() else {
            return;
        };
        if &record[..3] != BOOT_SIGNATURE {
            push(out, "DOS signature", 0, "DOS", String::from_utf8_lossy(&record[..3]));
            return;
        }
        let (fs_type, _) = FsType::from_dos_flags(record[3]);
        if fs_type != self.vol.fs_type() {
            push(out, "DOS flags", 3, self.vol.fs_type(), fs_type);
        }
        let stored = u32::from_be_bytes([record[4], record[5], record[6], record[7]]);
        let computed = boot_checksum(&record);
        if stored != computed {
            let expected = format!("{computed:#010x}");
            push(out, "boot checksum", BOOT_CHECKSUM_OFFSET, expected, format!("{stored:#010x}"));
        }
    }

    fn check_table(&self, dir: u32, slots: &[u32], out: &mut Vec<Discrepancy>) {
        for (bucket, &slot) in slots.iter().enumerate() {
            let offset = HASH_TABLE_OFFSET + bucket * 4;
            if slot == 0 || !self.in_range(out, "hash table", offset, slot, true) {
                continue;
            }
            if !self.strict {
                continue;
            }
            let Ok(entry) = self.vol.block(slot) else {
                continue;
            };
            let Some(name) = entry.name().filter(|_| entry.is_hashable()) else {
                let found = format!("{} at {slot}", entry.kind());
                push(out, "hash table", offset, "directory or file header", found);
                continue;
            };
            let expected = name.hash_value(slots.len() as u32, self.vol.is_intl()) as usize;
            if expected != bucket {
                push(out, "hash bucket", offset, expected, bucket);
            }
            if entry.parent() != Some(dir) {
                let found = format!("parent {}", entry.parent().unwrap_or(0));
                push(out, "hash table", offset, format!("entry with parent {dir}"), found);
            }
        }
    }

    /// Checks the links of an item stored in a directory.
    fn check_entry(&self, nr: u32, block: &Block, out: &mut Vec<Discrepancy>) {
        let bsize = self.bsize;
        let parent = block.parent().unwrap_or(0);
        let chain = block.hash_chain().unwrap_or(0);
        let parent_offset = bsize - PARENT_FROM_END;
        let chain_offset = bsize - HASH_CHAIN_FROM_END;
        let parent_ok = self.in_range(out, "parent", parent_offset, parent, false);
        let chain_ok = self.in_range(out, "hash chain", chain_offset, chain, true);
        if !self.strict {
            return;
        }

        if parent_ok {
            let is_dir = Block::is_directory;
            self.expect_kind(out, "parent", parent_offset, parent, is_dir, "directory");
            if let Ok(dir) = self.vol.block(parent) {
                if let (Some(table), Some(name)) = (dir.hash_table(), block.name()) {
                    let bucket = table.bucket_of(name, self.vol.is_intl());
                    if !self.bucket_contains(table.get(bucket), nr) {
                        let expected = format!("linked from bucket {bucket} of {parent}");
                        push(out, "hash bucket", bsize - NAME_FROM_END, expected, "unlinked");
                    }
                }
            }
        }
        if chain_ok && chain != 0 {
            if let Ok(next) = self.vol.block(chain) {
                if !next.is_hashable() {
                    let found = format!("{} at {chain}", next.kind());
                    push(out, "hash chain", chain_offset, "directory or file header", found);
                } else if next.parent() != Some(parent) {
                    let found = format!("parent {}", next.parent().unwrap_or(0));
                    push(out, "hash chain", chain_offset, format!("sibling under {parent}"), found);
                }
            }
        }
    }

    fn bucket_contains(&self, head: u32, nr: u32) -> bool {
        let mut seen = HashSet::new();
        let mut cur = head;
        while cur != 0 && seen.insert(cur) {
            if cur == nr {
                return true;
            }
            cur = match self.vol.block(cur) {
                Ok(b) => b.hash_chain().unwrap_or(0),
                Err(_) => 0,
            };
        }
        false
    }

    fn check_file(&self, file: &FileHeaderBlock, out: &mut Vec<Discrepancy>) {
        let bsize = self.bsize;
        let mut extents_ok = true;
        for (i, &extent) in file.extents.iter().enumerate() {
            let offset = HASH_TABLE_OFFSET + (self.ht - 1 - i.min(self.ht - 1)) * 4;
            extents_ok &= self.in_range(out, "data block", offset, extent, false);
        }
        self.in_range(out, "first data block", FIRST_DATA_OFFSET, file.first_data, true);
        self.in_range(out, "file list", bsize - EXTENSION_FROM_END, file.extension, true);
        if !self.strict || !extents_ok {
            return;
        }

        let expected_first = file.extents.first().copied().unwrap_or(0);
        if file.first_data != expected_first {
            push(out, "first data block", FIRST_DATA_OFFSET, expected_first, file.first_data);
        }
        let Ok((data, _)) = self.vol.file_blocks(file.nr) else {
            let offset = bsize - EXTENSION_FROM_END;
            push(out, "file list", offset, "file list chain", "broken chain");
            return;
        };
        let dsize = self.vol.data_block_capacity();
        let needed = file.byte_size.div_ceil(dsize) as usize;
        if data.len() != needed {
            push(
                out,
                "byte size",
                bsize - BYTE_SIZE_FROM_END,
                format!("{} data blocks", data.len()),
                format!("{needed} for {} bytes", file.byte_size),
            );
        }
        let is_data = |b: &Block| matches!(b, Block::Data(_));
        for (i, &d) in file.extents.iter().enumerate() {
            let offset = HASH_TABLE_OFFSET + (self.ht - 1 - i.min(self.ht - 1)) * 4;
            self.expect_kind(out, "data block", offset, d, is_data, "data block");
        }
    }
}

/// Blocks reachable from the root, including infrastructure blocks.
fn reachable(vol: &Volume) -> HashSet<u32> {
    let mut seen: HashSet<u32> = HashSet::new();
    if vol.boot_record().is_some() {
        seen.extend(0..BOOT_BLOCKS);
    }
    seen.insert(vol.root_nr());
    seen.extend(vol.store().bitmap().pages().iter().copied());
    seen.extend(vol.store().bitmap().ext_blocks().iter().copied());

    let mut entries = Vec::new();
    if let Err(err) = vol.collect_into(vol.root_nr(), &mut entries, true) {
        warn!(%err, "directory tree is damaged");
    }
    for nr in entries {
        seen.insert(nr);
        if let Ok(Block::FileHeader(_)) = vol.block(nr) {
            if let Ok((data, lists)) = vol.file_blocks(nr) {
                seen.extend(data);
                seen.extend(lists);
            }
        }
    }
    seen
}

impl Volume {
    /// Checks every block and returns the findings.
    pub fn check(&self, strict: bool) -> CheckReport {
        let checker = Checker::new(self, strict);
        let mut report = CheckReport {
            strict,
            ..Default::default()
        };

        for (nr, block) in self.store().iter() {
            match checker.block(nr) {
                Ok(problems) if !problems.is_empty() => report.corrupted.push(CorruptedBlock {
                    nr,
                    kind: block.kind(),
                    problems,
                }),
                Ok(_) => {}
                Err(err) => warn!(nr, %err, "block could not be checked"),
            }
        }

        if strict {
            let live = reachable(self);
            for (nr, block) in self.store().iter() {
                let unreferenced = !block.is_empty() && !live.contains(&nr);
                if nr >= BOOT_BLOCKS && unreferenced && !report.is_corrupted(nr) {
                    report.orphaned.push(nr);
                }
                if nr < BOOT_BLOCKS {
                    continue;
                }
                let marked_free = self.store().is_free(nr).unwrap_or(false);
                let in_use = !block.is_empty();
                if marked_free == in_use {
                    report.bitmap.push(BitmapMismatch {
                        nr,
                        marked_free,
                        in_use,
                    });
                }
            }
        }

        info!(
            strict,
            corrupted = report.corrupted.len(),
            orphaned = report.orphaned.len(),
            bitmap = report.bitmap.len(),
            "volume checked"
        );
        report
    }

    /// Discrepancies of a single block.
    pub fn check_block(&self, nr: u32, strict: bool) -> Result<Vec<Discrepancy>> {
        Checker::new(self, strict).block(nr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeConfig;

    fn ofs() -> Volume {
        Volume::new(VolumeConfig::default().with_fs_type(FsType::Ofs).with_name("Check")).unwrap()
    }

    #[test]
    fn fresh_volume_is_clean() {
        let vol = ofs();
        let report = vol.check(true);
        assert!(report.is_clean(), "{report}");
    }

    #[test]
    fn stale_checksum_is_reported() {
        let mut vol = ofs();
        let nr = vol.make_file("notes", b"some text").unwrap();
        let data = vol.file_blocks(nr).unwrap().0[0];
        if let Block::Data(DataBlock::Ofs(b)) = vol.store_mut().at_mut(data).unwrap() {
            b.payload[0] ^= 0x55;
        }
        let report = vol.check(false);
        assert_eq!(report.corrupted_blocks(), vec![data]);
        assert_eq!(report.corrupted[0].problems[0].item, "checksum");
        assert!(report.is_corrupted(data));
        assert_eq!(report.next_corrupted(0), Some(data));
        assert_eq!(report.prev_corrupted(data), None);
    }

    #[test]
    fn broken_sequence_number_needs_strict_mode() {
        let mut vol = ofs();
        let nr = vol.make_file("seq", &[7u8; 1200]).unwrap();
        let second = vol.file_blocks(nr).unwrap().0[1];
        if let Block::Data(DataBlock::Ofs(b)) = vol.store_mut().at_mut(second).unwrap() {
            b.seq_num = 9;
        }
        vol.store_mut().seal(second).unwrap();

        assert!(vol.check(false).corrupted.is_empty());
        let problems = vol.check_block(second, true).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].item, "sequence number");
        assert_eq!(problems[0].expected, "2");
    }

    #[test]
    fn unlinked_header_is_orphaned() {
        let mut vol = ofs();
        let header = vol.make_file("lost", b"x").unwrap();
        let data = vol.file_blocks(header).unwrap().0[0];
        let root = vol.root_nr();
        if let Some(table) = vol.store_mut().at_mut(root).unwrap().hash_table_mut() {
            *table = crate::hash_table::HashTable::new(table.size());
        }
        vol.store_mut().seal(root).unwrap();

        // The header still names the root as parent, so it is corrupt
        // rather than merely orphaned.
        let report = vol.check(true);
        assert_eq!(report.corrupted_blocks(), vec![header]);
        assert_eq!(report.orphaned, vec![data]);
        assert!(report.bitmap.is_empty());
    }

    #[test]
    fn bitmap_disagreement_is_reported() {
        let mut vol = ofs();
        let nr = vol.make_dir("d").unwrap();
        vol.store_mut().mark(nr, true).unwrap();
        let report = vol.check(true);
        assert_eq!(
            report.bitmap,
            vec![BitmapMismatch {
                nr,
                marked_free: true,
                in_use: true
            }]
        );
    }
}
