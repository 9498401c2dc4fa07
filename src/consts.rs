// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

pub const ADF_SECTOR_SIZE: usize = 512;
pub const ADF_SECTORS_PER_TRACK_DD: usize = 11;
pub const ADF_SECTORS_PER_TRACK_HD: usize = 22;
pub const ADF_HEADS: usize = 2;
pub const ADF_CYLINDERS: usize = 80;

pub const ADFSIZE_35_DD: usize = 901_120;
pub const ADFSIZE_35_DD_81: usize = 912_384;
pub const ADFSIZE_35_DD_82: usize = 923_648;
pub const ADFSIZE_35_DD_83: usize = 934_912;
pub const ADFSIZE_35_DD_84: usize = 946_176;
pub const ADFSIZE_35_HD: usize = 1_802_240;

pub const BOOT_BLOCKS: u32 = 2;
pub const DEFAULT_BLOCK_SIZE: u32 = 512;
pub const DEFAULT_CAPACITY: u32 = 1760;

pub const FILE_NAME_MAX_LEN: usize = 30;
pub const COMMENT_MAX_LEN: usize = 79;
pub const DEFAULT_VOLUME_NAME: &str = "Empty";

// Block type tags (first header word)
pub const T_HEADER: u32 = 2;
pub const T_DATA: u32 = 8;
pub const T_LIST: u32 = 16;

// Secondary type tags (last header word)
pub const ST_ROOT: i32 = 1;
pub const ST_USERDIR: i32 = 2;
pub const ST_FILE: i32 = -3;

// Header words shared by all typed blocks
pub const TYPE_OFFSET: usize = 0;
pub const HEADER_KEY_OFFSET: usize = 4;
pub const HIGH_SEQ_OFFSET: usize = 8;
pub const TABLE_SIZE_OFFSET: usize = 12;
pub const FIRST_DATA_OFFSET: usize = 16;
pub const CHECKSUM_OFFSET: usize = 20;
pub const HASH_TABLE_OFFSET: usize = 24;

/// Words at the start and end of a header block that are not hash slots.
pub const HEADER_RESERVED_WORDS: u32 = 56;

// Offsets measured back from the end of the block
pub const BM_FLAG_FROM_END: usize = 200;
pub const BM_PAGES_FROM_END: usize = 196;
pub const BM_EXT_FROM_END: usize = 96;
pub const PROTECTION_FROM_END: usize = 192;
pub const BYTE_SIZE_FROM_END: usize = 188;
pub const COMMENT_FROM_END: usize = 184;
pub const DATE_FROM_END: usize = 92;
pub const NAME_FROM_END: usize = 80;
pub const DISK_DATE_FROM_END: usize = 40;
pub const CREATION_DATE_FROM_END: usize = 28;
pub const HASH_CHAIN_FROM_END: usize = 16;
pub const PARENT_FROM_END: usize = 12;
pub const EXTENSION_FROM_END: usize = 8;
pub const SEC_TYPE_FROM_END: usize = 4;

pub const BM_PAGES_IN_ROOT: usize = 25;
pub const BM_FLAG_VALID: u32 = 0xFFFF_FFFF;

pub const OFS_DATA_HEADER_SIZE: usize = 24;

// Boot record
pub const BOOT_SIGNATURE: &[u8; 3] = b"DOS";
pub const BOOT_CHECKSUM_OFFSET: usize = 4;
pub const BOOT_ROOT_OFFSET: usize = 8;
pub const BOOT_CODE_OFFSET: usize = 12;
pub const DOSFLAG_FFS: u8 = 1;
pub const DOSFLAG_INTL: u8 = 2;

/// Kickstart 1.3 style boot code: finds dos.library and returns its init
/// vector. Lives at byte 12 of the boot record.
pub const STD_BOOT_CODE: [u8; 38] = [
    0x43, 0xFA, 0x00, 0x18, 0x4E, 0xAE, 0xFF, 0xA0, 0x4A, 0x80, 0x67, 0x0A, 0x20, 0x40, 0x20,
    0x68, 0x00, 0x16, 0x70, 0x00, 0x4E, 0x75, 0x70, 0xFF, 0x60, 0xFA, b'd', b'o', b's', b'.',
    b'l', b'i', b'b', b'r', b'a', b'r', b'y', 0x00,
];

pub const PROTECTION_FLAG_HIDDEN: u32 = 0x80;
pub const PROTECTION_FLAG_SCRIPT: u32 = 0x40;
pub const PROTECTION_FLAG_PURE: u32 = 0x20;
pub const PROTECTION_FLAG_ARCHIVE: u32 = 0x10;
pub const PROTECTION_FLAG_READ: u32 = 0x08;
pub const PROTECTION_FLAG_WRITE: u32 = 0x04;
pub const PROTECTION_FLAG_EXECUTE: u32 = 0x02;
pub const PROTECTION_FLAG_DELETE: u32 = 0x01;

pub const SECONDS_PER_DAY: i64 = 86400;
pub const SECONDS_PER_MINUTE: i64 = 60;
pub const TICKS_PER_SECOND: i64 = 50;
