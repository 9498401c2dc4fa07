// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! Conversion between typed [`Block`] records and raw sectors.
//!
//! Encoding writes the checksum that is stored in the record, so a block
//! read from a damaged image is written back unchanged. Use [`seal`] to
//! recompute the checksum after a record was modified.
//!
//! Header, directory and list records keep their sector when it carries
//! bytes the record does not model (name tails, reserved words, stale
//! table slots). Those bytes are written back under the typed fields.

use byteorder::{BigEndian, ByteOrder};

use crate::adf_blk::{
    BitmapBlock, BitmapExtBlock, Block, BlockKind, BootBlock, DataBlock, FfsDataBlock,
    FileHeaderBlock, FileListBlock, OfsDataBlock, RootBlock, UserDirBlock,
};
use crate::adf_err::{FsError, Result};
use crate::adf_str::{read_bcpl, write_bcpl, FsComment, FsName};
use crate::adf_time::FsTime;
use crate::checksum::{block_checksum, word_sum};
use crate::consts::*;
use crate::hash_table::HashTable;
use crate::volume::FsType;

/// Number of hash slots (and extent slots) in a header block.
pub fn table_size(bsize: usize) -> usize {
    bsize / 4 - HEADER_RESERVED_WORDS as usize
}

/// Payload bytes carried by one data block.
pub fn data_capacity(fs_type: FsType, bsize: usize) -> usize {
    match fs_type {
        FsType::Ofs => bsize - OFS_DATA_HEADER_SIZE,
        FsType::Ffs => bsize,
    }
}

/// Byte offset of the stored checksum, `None` if the kind has none.
pub fn checksum_offset(kind: BlockKind) -> Option<usize> {
    match kind {
        BlockKind::Root
        | BlockKind::UserDir
        | BlockKind::FileHeader
        | BlockKind::FileList
        | BlockKind::DataOfs => Some(CHECKSUM_OFFSET),
        BlockKind::Bitmap => Some(0),
        BlockKind::Empty | BlockKind::Boot | BlockKind::BitmapExt | BlockKind::DataFfs => None,
    }
}

fn rd(buf: &[u8], offset: usize) -> u32 {
    BigEndian::read_u32(&buf[offset..offset + 4])
}

fn wr(buf: &mut [u8], offset: usize, value: u32) {
    BigEndian::write_u32(&mut buf[offset..offset + 4], value);
}

fn rd_time(buf: &[u8], offset: usize) -> FsTime {
    FsTime::new(rd(buf, offset), rd(buf, offset + 4), rd(buf, offset + 8))
}

fn wr_time(buf: &mut [u8], offset: usize, time: FsTime) {
    wr(buf, offset, time.days);
    wr(buf, offset + 4, time.mins);
    wr(buf, offset + 8, time.ticks);
}

fn rd_table(buf: &[u8], ht: usize) -> HashTable {
    let slots = (0..ht).map(|i| rd(buf, HASH_TABLE_OFFSET + i * 4)).collect();
    HashTable::from_slots(slots)
}

fn wr_table(buf: &mut [u8], table: &HashTable) {
    for (i, &slot) in table.slots().iter().enumerate() {
        wr(buf, HASH_TABLE_OFFSET + i * 4, slot);
    }
}

/// Extent tables are filled from the last slot downwards.
fn rd_extents(buf: &[u8], ht: usize) -> Vec<u32> {
    let count = (rd(buf, HIGH_SEQ_OFFSET) as usize).min(ht);
    (0..count)
        .map(|i| rd(buf, HASH_TABLE_OFFSET + (ht - 1 - i) * 4))
        .collect()
}

fn wr_extents(buf: &mut [u8], extents: &[u32], ht: usize) {
    wr(buf, HIGH_SEQ_OFFSET, extents.len() as u32);
    for (i, &nr) in extents.iter().take(ht).enumerate() {
        wr(buf, HASH_TABLE_OFFSET + (ht - 1 - i) * 4, nr);
    }
}

/// Encodes a block into a fresh sector buffer.
pub fn encode(block: &Block, bsize: usize) -> Vec<u8> {
    let mut buf = vec![0u8; bsize];
    encode_into(block, &mut buf);
    buf
}

pub fn encode_into(block: &Block, buf: &mut [u8]) {
    let bsize = buf.len();
    let ht = table_size(bsize);
    match block.raw() {
        Some(raw) if raw.len() == bsize => buf.copy_from_slice(raw),
        _ => buf.fill(0),
    }

    match block {
        Block::Empty => {}
        Block::Boot(b) => {
            let len = b.data.len().min(bsize);
            buf[..len].copy_from_slice(&b.data[..len]);
        }
        Block::Root(b) => {
            wr(buf, TYPE_OFFSET, T_HEADER);
            wr(buf, TABLE_SIZE_OFFSET, b.hash_table.size() as u32);
            wr(buf, CHECKSUM_OFFSET, b.checksum);
            wr_table(buf, &b.hash_table);
            wr(buf, bsize - BM_FLAG_FROM_END, b.bm_flag);
            for (i, &page) in b.bm_pages.iter().take(BM_PAGES_IN_ROOT).enumerate() {
                wr(buf, bsize - BM_PAGES_FROM_END + i * 4, page);
            }
            wr(buf, bsize - BM_EXT_FROM_END, b.bm_ext);
            wr_time(buf, bsize - DATE_FROM_END, b.modified);
            write_bcpl(buf, bsize - NAME_FROM_END, b.name.as_bytes());
            wr_time(buf, bsize - DISK_DATE_FROM_END, b.disk_modified);
            wr_time(buf, bsize - CREATION_DATE_FROM_END, b.created);
            wr(buf, bsize - EXTENSION_FROM_END, b.extension);
            wr(buf, bsize - SEC_TYPE_FROM_END, ST_ROOT as u32);
        }
        Block::Bitmap(b) => {
            wr(buf, 0, b.checksum);
            for (i, &word) in b.words.iter().take(bsize / 4 - 1).enumerate() {
                wr(buf, 4 + i * 4, word);
            }
        }
        Block::BitmapExt(b) => {
            for (i, &page) in b.pages.iter().take(bsize / 4 - 1).enumerate() {
                wr(buf, i * 4, page);
            }
            wr(buf, bsize - 4, b.next);
        }
        Block::UserDir(b) => {
            wr(buf, TYPE_OFFSET, T_HEADER);
            wr(buf, HEADER_KEY_OFFSET, b.nr);
            wr(buf, CHECKSUM_OFFSET, b.checksum);
            wr_table(buf, &b.hash_table);
            wr(buf, bsize - PROTECTION_FROM_END, b.protection);
            write_bcpl(buf, bsize - COMMENT_FROM_END, b.comment.as_bytes());
            wr_time(buf, bsize - DATE_FROM_END, b.modified);
            write_bcpl(buf, bsize - NAME_FROM_END, b.name.as_bytes());
            wr(buf, bsize - HASH_CHAIN_FROM_END, b.hash_chain);
            wr(buf, bsize - PARENT_FROM_END, b.parent);
            wr(buf, bsize - EXTENSION_FROM_END, b.extension);
            wr(buf, bsize - SEC_TYPE_FROM_END, ST_USERDIR as u32);
        }
        Block::FileHeader(b) => {
            wr(buf, TYPE_OFFSET, T_HEADER);
            wr(buf, HEADER_KEY_OFFSET, b.nr);
            wr(buf, FIRST_DATA_OFFSET, b.first_data);
            wr(buf, CHECKSUM_OFFSET, b.checksum);
            wr_extents(buf, &b.extents, ht);
            wr(buf, bsize - PROTECTION_FROM_END, b.protection);
            wr(buf, bsize - BYTE_SIZE_FROM_END, b.byte_size);
            write_bcpl(buf, bsize - COMMENT_FROM_END, b.comment.as_bytes());
            wr_time(buf, bsize - DATE_FROM_END, b.modified);
            write_bcpl(buf, bsize - NAME_FROM_END, b.name.as_bytes());
            wr(buf, bsize - HASH_CHAIN_FROM_END, b.hash_chain);
            wr(buf, bsize - PARENT_FROM_END, b.parent);
            wr(buf, bsize - EXTENSION_FROM_END, b.extension);
            wr(buf, bsize - SEC_TYPE_FROM_END, ST_FILE as u32);
        }
        Block::FileList(b) => {
            wr(buf, TYPE_OFFSET, T_LIST);
            wr(buf, HEADER_KEY_OFFSET, b.nr);
            wr(buf, CHECKSUM_OFFSET, b.checksum);
            wr_extents(buf, &b.extents, ht);
            wr(buf, bsize - PARENT_FROM_END, b.parent);
            wr(buf, bsize - EXTENSION_FROM_END, b.next);
            wr(buf, bsize - SEC_TYPE_FROM_END, ST_FILE as u32);
        }
        Block::Data(DataBlock::Ofs(b)) => {
            wr(buf, TYPE_OFFSET, T_DATA);
            wr(buf, HEADER_KEY_OFFSET, b.header);
            wr(buf, HIGH_SEQ_OFFSET, b.seq_num);
            wr(buf, TABLE_SIZE_OFFSET, b.data_size);
            wr(buf, FIRST_DATA_OFFSET, b.next);
            wr(buf, CHECKSUM_OFFSET, b.checksum);
            let len = b.payload.len().min(bsize - OFS_DATA_HEADER_SIZE);
            buf[OFS_DATA_HEADER_SIZE..OFS_DATA_HEADER_SIZE + len]
                .copy_from_slice(&b.payload[..len]);
        }
        Block::Data(DataBlock::Ffs(b)) => {
            let len = b.payload.len().min(bsize);
            buf[..len].copy_from_slice(&b.payload[..len]);
        }
    }
}

/// Recomputes and stores the checksum of a block.
pub fn seal(block: &mut Block, bsize: usize) {
    if let Some(offset) = checksum_offset(block.kind()) {
        let buf = encode(block, bsize);
        block.set_checksum(block_checksum(&buf, offset));
    }
}

/// Checksum stored in the record and the value it should have.
pub fn checksums(block: &Block, bsize: usize) -> Option<(u32, u32)> {
    let offset = checksum_offset(block.kind())?;
    let buf = encode(block, bsize);
    Some((rd(&buf, offset), block_checksum(&buf, offset)))
}

pub fn checksum_valid(block: &Block, bsize: usize) -> bool {
    checksum_offset(block.kind()).is_none() || word_sum(&encode(block, bsize)) == 0
}

pub fn verify(block: &Block, nr: u32, bsize: usize) -> Result<()> {
    match checksums(block, bsize) {
        Some((stored, computed)) if stored != computed => Err(FsError::ChecksumMismatch {
            nr,
            stored,
            computed,
        }),
        _ => Ok(()),
    }
}

fn check_self_ref(buf: &[u8], nr: u32, kind: BlockKind) -> Result<()> {
    let key = rd(buf, HEADER_KEY_OFFSET);
    if key != nr {
        return Err(FsError::TypeMismatch {
            nr,
            detail: format!("{kind} claims to be block {key}"),
        });
    }
    Ok(())
}

/// Decodes a tagged block by inspecting its type words.
///
/// All-zero sectors decode as [`Block::Empty`]. Kinds without a tag
/// (boot, bitmap, bitmap extension, FFS data) must be decoded with
/// [`decode_as`] by a caller that knows their position.
pub fn decode(buf: &[u8], nr: u32) -> Result<Block> {
    if buf.iter().all(|&b| b == 0) {
        return Ok(Block::Empty);
    }
    let bsize = buf.len();
    let type_word = rd(buf, TYPE_OFFSET);
    let sec_type = rd(buf, bsize - SEC_TYPE_FROM_END) as i32;

    let kind = match (type_word, sec_type) {
        (T_HEADER, ST_ROOT) => BlockKind::Root,
        (T_HEADER, ST_USERDIR) => BlockKind::UserDir,
        (T_HEADER, ST_FILE) => BlockKind::FileHeader,
        (T_LIST, ST_FILE) => BlockKind::FileList,
        (T_DATA, _) => BlockKind::DataOfs,
        _ => {
            return Err(FsError::TypeMismatch {
                nr,
                detail: format!("unknown block type {type_word}/{sec_type}"),
            })
        }
    };
    decode_as(buf, nr, kind)
}

/// Decodes a sector as the given kind.
pub fn decode_as(buf: &[u8], nr: u32, kind: BlockKind) -> Result<Block> {
    let mut block = decode_fields(buf, nr, kind)?;
    if block.raw().is_some() && encode(&block, buf.len()) != buf {
        if let Some(raw) = block.raw_mut() {
            *raw = buf.to_vec();
        }
    }
    Ok(block)
}

fn decode_fields(buf: &[u8], nr: u32, kind: BlockKind) -> Result<Block> {
    let bsize = buf.len();
    let ht = table_size(bsize);

    let block = match kind {
        BlockKind::Empty => Block::Empty,
        BlockKind::Boot => Block::Boot(BootBlock {
            nr,
            data: buf.to_vec(),
        }),
        BlockKind::Root => Block::Root(RootBlock {
            nr,
            checksum: rd(buf, CHECKSUM_OFFSET),
            name: FsName::from_bytes(read_bcpl(buf, bsize - NAME_FROM_END, FILE_NAME_MAX_LEN)),
            hash_table: rd_table(buf, ht),
            bm_flag: rd(buf, bsize - BM_FLAG_FROM_END),
            bm_pages: (0..BM_PAGES_IN_ROOT)
                .map(|i| rd(buf, bsize - BM_PAGES_FROM_END + i * 4))
                .collect(),
            bm_ext: rd(buf, bsize - BM_EXT_FROM_END),
            modified: rd_time(buf, bsize - DATE_FROM_END),
            disk_modified: rd_time(buf, bsize - DISK_DATE_FROM_END),
            created: rd_time(buf, bsize - CREATION_DATE_FROM_END),
            extension: rd(buf, bsize - EXTENSION_FROM_END),
            raw: Vec::new(),
        }),
        BlockKind::Bitmap => Block::Bitmap(BitmapBlock {
            nr,
            checksum: rd(buf, 0),
            words: (1..bsize / 4).map(|i| rd(buf, i * 4)).collect(),
        }),
        BlockKind::BitmapExt => Block::BitmapExt(BitmapExtBlock {
            nr,
            pages: (0..bsize / 4 - 1).map(|i| rd(buf, i * 4)).collect(),
            next: rd(buf, bsize - 4),
        }),
        BlockKind::UserDir => {
            check_self_ref(buf, nr, kind)?;
            Block::UserDir(UserDirBlock {
                nr,
                checksum: rd(buf, CHECKSUM_OFFSET),
                name: FsName::from_bytes(read_bcpl(buf, bsize - NAME_FROM_END, FILE_NAME_MAX_LEN)),
                comment: FsComment::from_bytes(read_bcpl(
                    buf,
                    bsize - COMMENT_FROM_END,
                    COMMENT_MAX_LEN,
                )),
                protection: rd(buf, bsize - PROTECTION_FROM_END),
                modified: rd_time(buf, bsize - DATE_FROM_END),
                hash_table: rd_table(buf, ht),
                hash_chain: rd(buf, bsize - HASH_CHAIN_FROM_END),
                parent: rd(buf, bsize - PARENT_FROM_END),
                extension: rd(buf, bsize - EXTENSION_FROM_END),
                raw: Vec::new(),
            })
        }
        BlockKind::FileHeader => {
            check_self_ref(buf, nr, kind)?;
            Block::FileHeader(FileHeaderBlock {
                nr,
                checksum: rd(buf, CHECKSUM_OFFSET),
                name: FsName::from_bytes(read_bcpl(buf, bsize - NAME_FROM_END, FILE_NAME_MAX_LEN)),
                comment: FsComment::from_bytes(read_bcpl(
                    buf,
                    bsize - COMMENT_FROM_END,
                    COMMENT_MAX_LEN,
                )),
                protection: rd(buf, bsize - PROTECTION_FROM_END),
                modified: rd_time(buf, bsize - DATE_FROM_END),
                byte_size: rd(buf, bsize - BYTE_SIZE_FROM_END),
                first_data: rd(buf, FIRST_DATA_OFFSET),
                extents: rd_extents(buf, ht),
                hash_chain: rd(buf, bsize - HASH_CHAIN_FROM_END),
                parent: rd(buf, bsize - PARENT_FROM_END),
                extension: rd(buf, bsize - EXTENSION_FROM_END),
                raw: Vec::new(),
            })
        }
        BlockKind::FileList => {
            check_self_ref(buf, nr, kind)?;
            Block::FileList(FileListBlock {
                nr,
                checksum: rd(buf, CHECKSUM_OFFSET),
                extents: rd_extents(buf, ht),
                parent: rd(buf, bsize - PARENT_FROM_END),
                next: rd(buf, bsize - EXTENSION_FROM_END),
                raw: Vec::new(),
            })
        }
        BlockKind::DataOfs => Block::Data(DataBlock::Ofs(OfsDataBlock {
            nr,
            checksum: rd(buf, CHECKSUM_OFFSET),
            header: rd(buf, HEADER_KEY_OFFSET),
            seq_num: rd(buf, HIGH_SEQ_OFFSET),
            data_size: rd(buf, TABLE_SIZE_OFFSET),
            next: rd(buf, FIRST_DATA_OFFSET),
            payload: buf[OFS_DATA_HEADER_SIZE..].to_vec(),
        })),
        BlockKind::DataFfs => Block::Data(DataBlock::Ffs(FfsDataBlock {
            nr,
            payload: buf.to_vec(),
        })),
    };
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Block {
        Block::FileHeader(FileHeaderBlock {
            nr: 883,
            checksum: 0,
            name: FsName::new("readme").unwrap(),
            comment: FsComment::new("hello"),
            protection: 0,
            modified: FsTime::new(100, 200, 300),
            byte_size: 1000,
            first_data: 884,
            extents: vec![884, 885],
            hash_chain: 0,
            parent: 880,
            extension: 0,
            raw: Vec::new(),
        })
    }

    #[test]
    fn sealed_blocks_have_valid_checksums() {
        let mut block = sample_header();
        assert!(!checksum_valid(&block, 512));
        seal(&mut block, 512);
        assert!(checksum_valid(&block, 512));
        assert!(verify(&block, 883, 512).is_ok());
    }

    #[test]
    fn decode_restores_encoded_header() {
        let mut block = sample_header();
        seal(&mut block, 512);
        let buf = encode(&block, 512);
        let decoded = decode(&buf, 883).unwrap();
        assert_eq!(decoded, block);
        assert!(checksum_valid(&decoded, 512));
    }

    #[test]
    fn bytes_outside_the_fields_are_kept() {
        let mut block = sample_header();
        seal(&mut block, 512);
        let clean = encode(&block, 512);
        assert_eq!(decode(&clean, 883).unwrap().raw(), Some(&[][..]));

        let mut buf = clean.clone();
        buf[512 - 196] = 0x12;
        buf[512 - NAME_FROM_END + 10] = b'~';
        let sum = block_checksum(&buf, CHECKSUM_OFFSET);
        wr(&mut buf, CHECKSUM_OFFSET, sum);
        let decoded = decode(&buf, 883).unwrap();
        assert_eq!(decoded.raw(), Some(&buf[..]));
        assert!(checksum_valid(&decoded, 512));
        assert_eq!(encode(&decoded, 512), buf);
    }

    #[test]
    fn extents_are_stored_in_reverse() {
        let mut block = sample_header();
        seal(&mut block, 512);
        let buf = encode(&block, 512);
        assert_eq!(rd(&buf, HIGH_SEQ_OFFSET), 2);
        assert_eq!(rd(&buf, HASH_TABLE_OFFSET + 71 * 4), 884);
        assert_eq!(rd(&buf, HASH_TABLE_OFFSET + 70 * 4), 885);
    }

    #[test]
    fn wrong_position_is_a_type_mismatch() {
        let mut block = sample_header();
        seal(&mut block, 512);
        let buf = encode(&block, 512);
        assert!(matches!(
            decode(&buf, 884),
            Err(FsError::TypeMismatch { nr: 884, .. })
        ));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let mut buf = vec![0u8; 512];
        wr(&mut buf, 0, 0x1234);
        assert!(matches!(decode(&buf, 5), Err(FsError::TypeMismatch { .. })));
        assert_eq!(decode(&[0u8; 512], 5).unwrap(), Block::Empty);
    }

    #[test]
    fn damaged_payload_breaks_checksum() {
        let mut block = Block::Data(DataBlock::Ofs(OfsDataBlock {
            nr: 900,
            checksum: 0,
            header: 883,
            seq_num: 1,
            data_size: 5,
            next: 0,
            payload: b"hello".to_vec(),
        }));
        seal(&mut block, 512);
        let mut buf = encode(&block, 512);
        buf[OFS_DATA_HEADER_SIZE] ^= 0xFF;
        let decoded = decode(&buf, 900).unwrap();
        assert!(matches!(
            verify(&decoded, 900, 512),
            Err(FsError::ChecksumMismatch { nr: 900, .. })
        ));
    }
}
