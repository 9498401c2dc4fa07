// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! Flat sector images (ADF) and their conversion to and from volumes.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::adf_blk::{Block, BlockKind, DataBlock};
use crate::adf_err::{FsError, Result};
use crate::bitmap::Bitmap;
use crate::codec;
use crate::consts::*;
use crate::store::BlockStore;
use crate::volume::{FsType, Volume};

/// Standard Amiga floppy geometries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiskType {
    Dd,
    Dd81,
    Dd82,
    Dd83,
    Dd84,
    Hd,
}

impl DiskType {
    pub const ALL: [DiskType; 6] = [
        DiskType::Dd,
        DiskType::Dd81,
        DiskType::Dd82,
        DiskType::Dd83,
        DiskType::Dd84,
        DiskType::Hd,
    ];

    pub fn byte_size(self) -> usize {
        match self {
            DiskType::Dd => ADFSIZE_35_DD,
            DiskType::Dd81 => ADFSIZE_35_DD_81,
            DiskType::Dd82 => ADFSIZE_35_DD_82,
            DiskType::Dd83 => ADFSIZE_35_DD_83,
            DiskType::Dd84 => ADFSIZE_35_DD_84,
            DiskType::Hd => ADFSIZE_35_HD,
        }
    }

    pub fn from_byte_size(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.byte_size() == len)
    }

    pub fn sectors_per_track(self) -> usize {
        match self {
            DiskType::Hd => ADF_SECTORS_PER_TRACK_HD,
            _ => ADF_SECTORS_PER_TRACK_DD,
        }
    }

    pub fn cylinders(self) -> usize {
        self.byte_size() / (ADF_HEADS * self.sectors_per_track() * ADF_SECTOR_SIZE)
    }

    /// Number of 512-byte blocks.
    pub fn capacity(self) -> u32 {
        (self.byte_size() / ADF_SECTOR_SIZE) as u32
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiskType::Dd => "DD",
            DiskType::Dd81 => "DD (81 cylinders)",
            DiskType::Dd82 => "DD (82 cylinders)",
            DiskType::Dd83 => "DD (83 cylinders)",
            DiskType::Dd84 => "DD (84 cylinders)",
            DiskType::Hd => "HD",
        };
        f.write_str(s)
    }
}

impl FromStr for DiskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dd" | "880k" => Ok(DiskType::Dd),
            "dd81" => Ok(DiskType::Dd81),
            "dd82" => Ok(DiskType::Dd82),
            "dd83" => Ok(DiskType::Dd83),
            "dd84" => Ok(DiskType::Dd84),
            "hd" | "1760k" => Ok(DiskType::Hd),
            other => Err(format!("unknown disk type '{other}'")),
        }
    }
}

/// A disk image held in memory.
#[derive(Debug, Clone)]
pub struct Adf {
    data: Vec<u8>,
    disk_type: DiskType,
}

impl Adf {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_vec(data.to_vec())
    }

    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        let disk_type =
            DiskType::from_byte_size(data.len()).ok_or(FsError::UnrecognizedFormat(data.len()))?;
        Ok(Adf { data, disk_type })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Self::from_vec(data)
    }

    pub fn from_volume(vol: &Volume) -> Result<Self> {
        Self::from_vec(vol.to_image())
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path.as_ref())?;
        file.write_all(&self.data)?;
        Ok(())
    }

    pub fn disk_type(&self) -> DiskType {
        self.disk_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn read_sector(&self, nr: usize) -> Option<&[u8]> {
        self.data.get(nr * ADF_SECTOR_SIZE..(nr + 1) * ADF_SECTOR_SIZE)
    }

    pub fn volume(&self) -> Result<Volume> {
        Volume::from_image(&self.data)
    }
}

/// Loads an image stored inside a zip archive. Without a name the first
/// entry ending in `.adf` is used.
pub fn load_adf_from_zip(zip_data: &[u8], adf_filename: Option<&str>) -> Result<Adf> {
    let mut archive =
        ZipArchive::new(Cursor::new(zip_data)).map_err(|e| FsError::Archive(e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| FsError::Archive(e.to_string()))?;
        let wanted = match adf_filename {
            Some(name) => file.name() == name,
            None => file.name().to_ascii_lowercase().ends_with(".adf"),
        };
        if wanted {
            debug!(entry = file.name(), "reading image from archive");
            let mut adf_data = Vec::new();
            file.read_to_end(&mut adf_data)?;
            return Adf::from_vec(adf_data);
        }
    }

    Err(FsError::Archive(match adf_filename {
        Some(name) => format!("'{name}' not found in archive"),
        None => "no .adf entry in archive".to_string(),
    }))
}

fn is_blank(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

/// Guesses the variant of an image without a boot block: OFS if a file's
/// first extent carries an OFS data header pointing back to the file.
fn infer_fs_type(store: &BlockStore) -> FsType {
    let ofs = store.iter().any(|(nr, block)| match block {
        Block::FileHeader(file) => file.extents.first().is_some_and(|&d| {
            matches!(store.at(d), Ok(Block::Data(DataBlock::Ofs(data))) if data.header == nr)
        }),
        _ => false,
    });
    if ofs {
        FsType::Ofs
    } else {
        FsType::Ffs
    }
}

impl Volume {
    /// Decodes a standard-size image. Blocks with bad checksums are kept
    /// as read and show up in [`Volume::check`].
    pub fn from_image(bytes: &[u8]) -> Result<Volume> {
        Self::import(bytes, None)
    }

    /// Like [`Volume::from_image`], forcing the file system variant.
    pub fn from_image_as(bytes: &[u8], fs_type: FsType) -> Result<Volume> {
        Self::import(bytes, Some(fs_type))
    }

    fn import(bytes: &[u8], forced: Option<FsType>) -> Result<Volume> {
        let disk_type =
            DiskType::from_byte_size(bytes.len()).ok_or(FsError::UnrecognizedFormat(bytes.len()))?;
        let bsize = ADF_SECTOR_SIZE;
        let capacity = disk_type.capacity();
        let sector = |nr: u32| &bytes[nr as usize * bsize..(nr as usize + 1) * bsize];
        let in_range = |nr: u32| nr >= BOOT_BLOCKS && nr < capacity;

        let mut store = BlockStore::new(capacity, bsize as u32);
        let mut placed: HashSet<u32> = HashSet::new();

        // The boot record spans both sectors even when its code fits in
        // the first one.
        let dos = &bytes[..3] == BOOT_SIGNATURE;
        let has_boot = dos || (0..BOOT_BLOCKS).any(|nr| !is_blank(sector(nr)));
        for nr in 0..BOOT_BLOCKS {
            if has_boot {
                store.put(nr, codec::decode_as(sector(nr), nr, BlockKind::Boot)?)?;
            }
            placed.insert(nr);
        }

        let root_nr = capacity / 2;
        let root = match codec::decode(sector(root_nr), root_nr)? {
            Block::Root(root) => root,
            other => return Err(FsError::expected(root_nr, BlockKind::Root, other.kind())),
        };
        placed.insert(root_nr);

        let mut ext_blocks = Vec::new();
        let mut pages: Vec<u32> = root.bm_pages.iter().copied().filter(|&p| p != 0).collect();
        let mut next = root.bm_ext;
        while next != 0 && in_range(next) && !placed.contains(&next) {
            let Block::BitmapExt(ext) =
                codec::decode_as(sector(next), next, BlockKind::BitmapExt)?
            else {
                break;
            };
            pages.extend(ext.pages.iter().copied().filter(|&p| p != 0));
            ext_blocks.push(next);
            placed.insert(next);
            next = ext.next;
            store.put(ext.nr, Block::BitmapExt(ext))?;
        }
        pages.retain(|&p| in_range(p) && p != root_nr && !ext_blocks.contains(&p));
        for &page in &pages {
            store.put(page, codec::decode_as(sector(page), page, BlockKind::Bitmap)?)?;
            placed.insert(page);
        }
        store.put(root_nr, Block::Root(root))?;

        for nr in BOOT_BLOCKS..capacity {
            if placed.contains(&nr) {
                continue;
            }
            match codec::decode(sector(nr), nr) {
                Ok(block) => store.put(nr, block)?,
                Err(err) => {
                    store.put(nr, codec::decode_as(sector(nr), nr, BlockKind::DataFfs)?)?;
                    store.set_undecodable(nr, err.to_string());
                }
            }
        }

        let (boot_type, intl) = if dos {
            FsType::from_dos_flags(bytes[3])
        } else {
            (infer_fs_type(&store), false)
        };
        let fs_type = forced.unwrap_or(boot_type);

        // FFS data blocks carry no header; anything a file references as an
        // extent is payload, whatever it happens to look like. Storing it
        // again clears its undecodable flag.
        if fs_type == FsType::Ffs {
            let mut extents = HashSet::new();
            for (_, block) in store.iter() {
                match block {
                    Block::FileHeader(b) => extents.extend(b.extents.iter().copied()),
                    Block::FileList(b) => extents.extend(b.extents.iter().copied()),
                    _ => {}
                }
            }
            extents.retain(|&nr| in_range(nr) && !placed.contains(&nr));
            for &nr in &extents {
                store.put(nr, codec::decode_as(sector(nr), nr, BlockKind::DataFfs)?)?;
            }
        }
        for (nr, reason) in store.undecodable_blocks() {
            warn!(nr, reason, "unrecognized block kept as raw data");
        }

        store.set_bitmap(Bitmap::new(capacity, bsize as u32, pages, ext_blocks));
        let mut bad = 0;
        for (nr, block) in store.iter() {
            if let Err(err) = codec::verify(block, nr, bsize) {
                warn!(%err, "damaged block");
                bad += 1;
            }
        }
        info!(%disk_type, %fs_type, bad_checksums = bad, "imported image");
        Ok(Volume::from_store(fs_type, intl, store))
    }

    /// Encodes every block in block order. Stored checksums are written as
    /// they are; call [`Volume::update_checksums`] first to refresh them.
    pub fn to_image(&self) -> Vec<u8> {
        let bsize = self.block_size() as usize;
        let mut image = vec![0u8; self.capacity() as usize * bsize];
        for ((_, block), buf) in self.store().iter().zip(image.chunks_mut(bsize)) {
            codec::encode_into(block, buf);
        }
        debug!(bytes = image.len(), "exported image");
        image
    }
}
