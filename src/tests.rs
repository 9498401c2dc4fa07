// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use std::io::Write;

use zip::write::{ExtendedFileOptions, FileOptions};

use crate::adf_blk::{Block, BlockKind};
use crate::adf_err::FsError;
use crate::codec;
use crate::consts::*;
use crate::disk::{load_adf_from_zip, Adf, DiskType};
use crate::volume::{EntryKind, FsType, Volume, VolumeConfig};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8 + 1).collect()
}

fn volume(fs_type: FsType) -> Volume {
    Volume::new(
        VolumeConfig::default()
            .with_fs_type(fs_type)
            .with_name("TestDisk"),
    )
    .unwrap()
}

/// A volume with nested directories, a file that needs list blocks, an
/// empty file and a boot block.
fn populated(fs_type: FsType) -> Volume {
    let mut vol = volume(fs_type);
    vol.make_dir("work").unwrap();
    vol.make_file("readme", b"hello amiga").unwrap();
    vol.make_file("empty", b"").unwrap();
    vol.change_dir("work").unwrap();
    vol.make_dir("src").unwrap();
    vol.make_file("big.bin", &pattern(40_000)).unwrap();
    vol.make_file("zeros", &[0u8; 1500]).unwrap();
    vol.change_dir("/").unwrap();
    vol.install_boot_block().unwrap();
    vol
}

fn assert_counts_balance(vol: &Volume) {
    assert_eq!(
        vol.store().count_free() + vol.store().live_blocks(),
        vol.capacity()
    );
}

#[test]
fn test_volume_creation() {
    let vol = volume(FsType::Ofs);
    assert_eq!(vol.capacity(), 1760);
    assert_eq!(vol.root_nr(), 880);
    assert_eq!(vol.bitmap_nr(), 881);
    assert_eq!(vol.data_block_capacity(), 488);
    assert_eq!(vol.name(), "TestDisk");
    assert_eq!(vol.free_blocks(), 1760 - 2 - 2);
    assert!(matches!(vol.block(880).unwrap(), Block::Root(_)));
    assert!(matches!(vol.block(881).unwrap(), Block::Bitmap(_)));
    assert_counts_balance(&vol);
}

#[test]
fn test_invalid_geometry() {
    assert!(matches!(
        Volume::new(VolumeConfig::default().with_block_size(500)),
        Err(FsError::InvalidGeometry(_))
    ));
    assert!(matches!(
        Volume::new(VolumeConfig::default().with_capacity(4)),
        Err(FsError::InvalidGeometry(_))
    ));
    assert!(matches!(
        Volume::new(VolumeConfig::default().with_name("a:b")),
        Err(FsError::InvalidName(_))
    ));
}

#[test]
fn test_boot_block_checksums() {
    let mut ofs = volume(FsType::Ofs);
    ofs.install_boot_block().unwrap();
    let boot = ofs.boot_record().unwrap();
    assert_eq!(&boot[..4], b"DOS\0");
    assert_eq!(u32::from_be_bytes([boot[4], boot[5], boot[6], boot[7]]), 0xC020_0F19);

    let mut ffs = volume(FsType::Ffs);
    ffs.install_boot_block().unwrap();
    let boot = ffs.boot_record().unwrap();
    assert_eq!(&boot[..4], b"DOS\x01");
    assert_eq!(u32::from_be_bytes([boot[4], boot[5], boot[6], boot[7]]), 0xC020_0F18);
}

#[test]
fn test_ffs_scenario() {
    let mut vol = Volume::new(
        VolumeConfig::default()
            .with_fs_type(FsType::Ffs)
            .with_capacity(1760)
            .with_block_size(512),
    )
    .unwrap();
    vol.make_dir("work").unwrap();
    vol.change_dir("work").unwrap();
    vol.make_file("a.txt", b"hello").unwrap();

    let entries = vol.collect(vol.current_dir(), false).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(vol.read_file(entries[0]).unwrap(), b"hello");
    assert_eq!(vol.path_of(entries[0]).unwrap(), "/work/a.txt");

    let report = vol.check(true);
    assert!(report.corrupted.is_empty(), "{report}");
    assert!(report.is_clean(), "{report}");
}

#[test]
fn test_ofs_image_scenario() {
    let image = populated(FsType::Ofs).to_image();
    assert_eq!(image.len(), ADFSIZE_35_DD);

    let vol = Volume::from_image(&image).unwrap();
    assert_eq!(vol.fs_type(), FsType::Ofs);
    let report = vol.check(true);
    assert!(report.corrupted.is_empty(), "{report}");

    let mut vol = vol;
    vol.change_dir("work").unwrap();
    let header = vol.seek("big.bin").unwrap().unwrap();
    let (data, _) = vol.file_blocks(header).unwrap();
    let victim = data[17];

    let mut damaged = image.clone();
    damaged[victim as usize * 512 + OFS_DATA_HEADER_SIZE + 3] ^= 0x40;
    let vol = Volume::from_image(&damaged).unwrap();
    let report = vol.check(true);
    assert_eq!(report.corrupted_blocks(), vec![victim]);
    assert_eq!(report.corrupted[0].kind, BlockKind::DataOfs);
    assert!(report.orphaned.is_empty());
}

#[test]
fn test_round_trip_preserves_blocks() {
    for fs_type in [FsType::Ofs, FsType::Ffs] {
        let vol = populated(fs_type);
        let back = Volume::from_image(&vol.to_image()).unwrap();
        assert_eq!(back.fs_type(), fs_type);
        assert_eq!(back.name(), "TestDisk");
        for nr in 0..vol.capacity() {
            assert_eq!(back.block(nr).unwrap(), vol.block(nr).unwrap(), "block {nr}");
        }
        assert_eq!(back.to_image(), vol.to_image());
        assert_counts_balance(&back);
    }
}

#[test]
fn test_round_trip_reads_files_back() {
    let vol = populated(FsType::Ffs);
    let mut back = Volume::from_image(&vol.to_image()).unwrap();
    back.change_dir("work").unwrap();
    let big = back.seek("big.bin").unwrap().unwrap();
    assert_eq!(back.read_file(big).unwrap(), pattern(40_000));
    let zeros = back.seek("zeros").unwrap().unwrap();
    assert_eq!(back.read_file(zeros).unwrap(), vec![0u8; 1500]);
}

#[test]
fn test_variant_without_boot_block() {
    let mut vol = volume(FsType::Ofs);
    vol.make_file("f", b"data").unwrap();
    let image = vol.to_image();
    assert_eq!(Volume::from_image(&image).unwrap().fs_type(), FsType::Ofs);
    assert_eq!(
        Volume::from_image_as(&image, FsType::Ffs).unwrap().fs_type(),
        FsType::Ffs
    );
}

#[test]
fn test_checksum_law() {
    let vol = populated(FsType::Ofs);
    for (nr, block) in vol.store().iter() {
        if block.kind() == BlockKind::Boot {
            continue;
        }
        let buf = codec::encode(block, 512);
        let back = codec::decode_as(&buf, nr, block.kind()).unwrap();
        assert!(codec::checksum_valid(&back, 512), "block {nr}");
    }
}

#[test]
fn test_file_lists() {
    let mut vol = volume(FsType::Ofs);
    let data = pattern(40_000);
    let nr = vol.make_file("big", &data).unwrap();
    let (blocks, lists) = vol.file_blocks(nr).unwrap();
    assert_eq!(blocks.len(), 40_000usize.div_ceil(488));
    assert_eq!(lists.len(), 1);
    assert_eq!(vol.read_file(nr).unwrap(), data);

    match vol.block(nr).unwrap() {
        Block::FileHeader(h) => {
            assert_eq!(h.extents.len(), 72);
            assert_eq!(h.first_data, blocks[0]);
            assert_eq!(h.extension, lists[0]);
            assert_eq!(h.byte_size, 40_000);
        }
        other => panic!("unexpected {}", other.kind()),
    }
}

#[test]
fn test_count_invariant() {
    let mut vol = populated(FsType::Ffs);
    assert_counts_balance(&vol);
    vol.change_dir("work").unwrap();
    vol.delete("big.bin").unwrap();
    assert_counts_balance(&vol);
    vol.delete("src").unwrap();
    vol.change_dir("..").unwrap();
    vol.delete("work").unwrap_err();
    assert_counts_balance(&vol);
    assert!(vol.check(true).is_clean());
}

#[test]
fn test_hash_chain_integrity() {
    let mut vol = volume(FsType::Ffs);
    let names = ["ab", "ev", "fi", "kp"];
    let nrs: Vec<u32> = names
        .iter()
        .map(|n| vol.make_file(n, n.as_bytes()).unwrap())
        .collect();
    for (name, nr) in names.iter().zip(&nrs) {
        assert_eq!(vol.seek(name).unwrap(), Some(*nr));
    }

    vol.delete("ev").unwrap();
    assert_eq!(vol.seek("ev").unwrap(), None);
    assert_eq!(vol.seek("ab").unwrap(), Some(nrs[0]));
    assert_eq!(vol.seek("fi").unwrap(), Some(nrs[2]));
    assert_eq!(vol.seek("kp").unwrap(), Some(nrs[3]));
    assert!(vol.check(true).is_clean());
}

#[test]
fn test_rollback_on_full_volume() {
    let mut vol = volume(FsType::Ffs);
    vol.make_file("small", b"fits").unwrap();
    let free = vol.free_blocks();
    let before = vol.to_image();

    let err = vol.make_file("huge", &vec![1u8; 2_000 * 512]).unwrap_err();
    assert!(matches!(err, FsError::VolumeFull));
    assert_eq!(vol.free_blocks(), free);
    assert_eq!(vol.seek("huge").unwrap(), None);
    assert_eq!(vol.to_image(), before);
    assert_counts_balance(&vol);
}

#[test]
fn test_name_errors() {
    let mut vol = volume(FsType::Ffs);
    vol.make_dir("Work").unwrap();
    assert!(matches!(vol.make_dir("WORK"), Err(FsError::NameExists(_))));
    assert!(matches!(
        vol.make_file("work", b""),
        Err(FsError::NameExists(_))
    ));
    assert!(matches!(
        vol.make_file(&"x".repeat(31), b""),
        Err(FsError::NameTooLong(_))
    ));
    assert!(vol.make_file(&"x".repeat(30), b"").is_ok());
}

#[test]
fn test_navigation() {
    let mut vol = populated(FsType::Ffs);
    assert!(matches!(vol.change_dir("nope"), Err(FsError::NotFound(_))));
    assert!(matches!(
        vol.change_dir("readme"),
        Err(FsError::NotADirectory(_))
    ));
    let work = vol.change_dir("work").unwrap();
    let src = vol.change_dir("src").unwrap();
    assert_eq!(vol.path().unwrap(), "/work/src");
    assert_eq!(vol.change_dir("..").unwrap(), work);
    assert_eq!(vol.change_dir("/").unwrap(), vol.root_nr());
    assert_eq!(vol.change_dir("..").unwrap(), vol.root_nr());
    assert_eq!(vol.path_of(src).unwrap(), "/work/src");
}

#[test]
fn test_listing() {
    let mut vol = populated(FsType::Ofs);
    let top = vol.list(false).unwrap();
    assert_eq!(top.len(), 3);
    let all = vol.list(true).unwrap();
    assert_eq!(all.len(), 6);

    // Nested entries follow their directory.
    let work = all.iter().position(|e| e.name == "work").unwrap();
    let nested: Vec<&str> = all[work + 1..work + 4]
        .iter()
        .map(|e| e.path.as_str())
        .collect();
    assert!(nested.iter().all(|p| p.starts_with("/work/")));

    let readme = all.iter().find(|e| e.name == "readme").unwrap();
    assert_eq!(readme.kind, EntryKind::File);
    assert_eq!(readme.size, 11);

    vol.change_dir("work").unwrap();
    assert_eq!(vol.list(false).unwrap().len(), 3);
}

#[test]
fn test_collect_suppresses_cycles() {
    let mut vol = volume(FsType::Ffs);
    let a = vol.make_file("a", b"1").unwrap();
    vol.make_file("b", b"2").unwrap();
    vol.store_mut().at_mut(a).unwrap().set_hash_chain(a);
    vol.store_mut().seal(a).unwrap();

    let mut list = Vec::new();
    let err = vol.collect_into(vol.root_nr(), &mut list, false).unwrap_err();
    assert!(matches!(err, FsError::Inconsistent { nr, .. } if nr == a));
    assert_eq!(list.len(), 2);
}

#[test]
fn test_international_names() {
    let mut vol = Volume::new(VolumeConfig::default().with_intl(true)).unwrap();
    let nr = vol.make_file("café", b"x").unwrap();
    assert_eq!(vol.seek("CAFÉ").unwrap(), Some(nr));

    let mut plain = volume(FsType::Ffs);
    plain.make_file("café", b"x").unwrap();
    assert_eq!(plain.seek("CAFÉ").unwrap(), None);
}

#[test]
fn test_rename_and_info() {
    let mut vol = populated(FsType::Ffs);
    vol.set_name("Workbench").unwrap();
    let info = vol.info().unwrap();
    assert_eq!(info.name, "Workbench");
    assert_eq!(info.capacity, 1760);
    assert_eq!(info.free_blocks + info.used_blocks, 1760);
    assert_eq!(info.total_bytes, ADFSIZE_35_DD as u64);
    assert!(vol.check(false).corrupted.is_empty());
}

#[test]
fn test_update_checksums_repairs_blocks() {
    let mut vol = populated(FsType::Ofs);
    let header = vol.seek("readme").unwrap().unwrap();
    if let Block::FileHeader(h) = vol.store_mut().at_mut(header).unwrap() {
        h.protection = PROTECTION_FLAG_DELETE;
    }
    if let Ok(Block::Boot(b)) = vol.store_mut().at_mut(0) {
        b.data[100] = 0xAA;
    }
    let report = vol.check(false);
    assert!(report.is_corrupted(header));
    assert!(report.is_corrupted(0));

    vol.update_checksums();
    assert!(vol.check(true).is_clean());
}

#[test]
fn test_hd_and_extended_geometries() {
    for disk in [DiskType::Hd, DiskType::Dd84] {
        let mut vol = Volume::new(
            VolumeConfig::default().with_capacity(disk.capacity()),
        )
        .unwrap();
        vol.make_file("f", &pattern(5_000)).unwrap();
        let adf = Adf::from_volume(&vol).unwrap();
        assert_eq!(adf.disk_type(), disk);
        let back = adf.volume().unwrap();
        let nr = back.seek("f").unwrap().unwrap();
        assert_eq!(back.read_file(nr).unwrap(), pattern(5_000));
    }
}

#[test]
fn test_bitmap_extension_blocks() {
    let capacity = 26 * 4064 + 2;
    let mut vol = Volume::new(VolumeConfig::default().with_capacity(capacity)).unwrap();
    assert_eq!(vol.store().bitmap().pages().len(), 26);
    assert_eq!(vol.store().bitmap().ext_blocks().len(), 1);
    let root = vol.root().unwrap();
    assert_eq!(root.bm_ext, vol.store().bitmap().ext_blocks()[0]);
    assert!(root.bm_pages.iter().all(|&p| p != 0));
    vol.make_file("f", b"data").unwrap();
    assert_counts_balance(&vol);
    assert!(vol.check(true).is_clean());
}

#[test]
fn test_load_adf_from_zip() {
    let image = populated(FsType::Ffs).to_image();
    let mut zip_buffer = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_buffer));
        let stored = || {
            FileOptions::<ExtendedFileOptions>::default()
                .compression_method(zip::CompressionMethod::Stored)
        };
        zip.start_file("readme.txt", stored()).unwrap();
        zip.write_all(b"not a disk").unwrap();
        zip.start_file("test.adf", stored()).unwrap();
        zip.write_all(&image).unwrap();
        zip.finish().unwrap();
    }

    let adf = load_adf_from_zip(&zip_buffer, None).unwrap();
    assert_eq!(adf.data(), &image[..]);
    let named = load_adf_from_zip(&zip_buffer, Some("test.adf")).unwrap();
    assert_eq!(named.volume().unwrap().name(), "TestDisk");
    assert!(matches!(
        load_adf_from_zip(&zip_buffer, Some("other.adf")),
        Err(FsError::Archive(_))
    ));
}

#[test]
fn test_image_file_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("disk.adf");
    let vol = populated(FsType::Ofs);
    Adf::from_volume(&vol).unwrap().write_to_file(&path).unwrap();

    let adf = Adf::from_file(&path).unwrap();
    assert_eq!(adf.disk_type(), DiskType::Dd);
    let back = adf.volume().unwrap();
    let nr = back.seek("readme").unwrap().unwrap();
    assert_eq!(back.read_file(nr).unwrap(), b"hello amiga");
}

/// Recomputes the standard checksum of sector `nr` inside a raw image.
fn reseal_sector(image: &mut [u8], nr: u32) {
    let sector = &mut image[nr as usize * 512..(nr as usize + 1) * 512];
    let sum = crate::checksum::block_checksum(sector, CHECKSUM_OFFSET);
    sector[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&sum.to_be_bytes());
}

#[test]
fn test_imported_boot_block_is_checked() {
    let mut vol = volume(FsType::Ffs);
    vol.install_boot_block().unwrap();
    let mut image = vol.to_image();
    assert!(image[512..1024].iter().all(|&b| b == 0));

    let back = Volume::from_image(&image).unwrap();
    assert_eq!(back.boot_record().map(|r| r.len()), Some(1024));
    assert!(matches!(back.block(1).unwrap(), Block::Boot(_)));
    assert!(back.check(true).is_clean());

    image[100] ^= 0x01;
    let mut back = Volume::from_image(&image).unwrap();
    let report = back.check(true);
    assert_eq!(report.corrupted_blocks(), vec![0]);
    assert_eq!(report.corrupted[0].problems[0].item, "boot checksum");
    back.update_checksums();
    assert!(back.check(true).is_clean());
}

#[test]
fn test_unmodelled_bytes_survive_import() {
    let mut vol = volume(FsType::Ofs);
    let header = vol.make_file("notes", b"some text").unwrap();
    let mut image = vol.to_image();
    let base = header as usize * 512;
    // Stale byte behind the name and a reserved word nobody models.
    image[base + 512 - NAME_FROM_END + 1 + 5 + 2] = b'~';
    image[base + 512 - 196] = 0x12;
    reseal_sector(&mut image, header);

    let mut back = Volume::from_image(&image).unwrap();
    let report = back.check(true);
    assert!(report.is_clean(), "{report}");
    assert_eq!(back.to_image(), image);
    assert_eq!(back.read_file(header).unwrap(), b"some text");
    assert!(back.block(header).unwrap().raw().is_some_and(|r| !r.is_empty()));

    // Later edits keep the bytes and stay valid.
    back.make_file("more", b"x").unwrap();
    back.set_name("Renamed").unwrap();
    let again = back.to_image();
    assert_eq!(again[base + 512 - 196], 0x12);
    assert!(back.check(true).is_clean());
}

#[test]
fn test_damaged_dates_do_not_panic() {
    let vol = volume(FsType::Ffs);
    let mut image = vol.to_image();
    let root = vol.root_nr();
    let offset = root as usize * 512 + 512 - CREATION_DATE_FROM_END;
    image[offset..offset + 4].copy_from_slice(&u32::MAX.to_be_bytes());
    reseal_sector(&mut image, root);

    let back = Volume::from_image(&image).unwrap();
    let info = back.info().unwrap();
    assert!(info.to_string().contains(&format!("day {}", u32::MAX)));
    assert!(back.check(true).is_clean());
}

#[test]
fn test_undecodable_header_is_corrupted_on_ffs() {
    let mut vol = volume(FsType::Ffs);
    vol.install_boot_block().unwrap();
    let header = vol.make_file("f", b"data").unwrap();
    let data = vol.file_blocks(header).unwrap().0[0];
    let mut image = vol.to_image();
    image[header as usize * 512 + HEADER_KEY_OFFSET + 3] ^= 0x01;

    // Junk in a free sector is stale data, not damage.
    let free = 1500;
    image[free * 512..free * 512 + 4].copy_from_slice(&0x1234u32.to_be_bytes());

    let back = Volume::from_image(&image).unwrap();
    assert_eq!(back.fs_type(), FsType::Ffs);
    assert!(back.store().undecodable(header).is_some());
    let report = back.check(true);
    assert!(report.is_corrupted(header), "{report}");
    let entry = report.corrupted.iter().find(|c| c.nr == header).unwrap();
    assert!(entry.problems.iter().any(|p| p.item == "type"));
    assert!(!report.orphaned.contains(&header));
    assert!(report.orphaned.contains(&data));
    assert!(!report.is_corrupted(free as u32));
}
