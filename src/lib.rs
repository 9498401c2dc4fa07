// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! Amiga OFS/FFS volumes: build them from nothing, fill them with files and
//! directories, check their integrity and convert them to and from ADF
//! images.

pub mod adf_blk;
pub mod adf_err;
pub mod adf_str;
pub mod adf_time;
pub mod bitmap;
pub mod check;
pub mod checksum;
pub mod codec;
pub mod consts;
pub mod disk;
pub mod hash_table;
pub mod host;
pub mod store;
pub mod volume;

pub use adf_err::{FsError, Result};
pub use check::CheckReport;
pub use disk::{load_adf_from_zip, Adf, DiskType};
pub use host::{HostEntry, HostKind};
pub use volume::{DirEntryInfo, EntryKind, FsType, Volume, VolumeConfig, VolumeInfo};

#[cfg(test)]
mod tests;
