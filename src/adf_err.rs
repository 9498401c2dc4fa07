// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use thiserror::Error;

use crate::adf_blk::BlockKind;

/// Errors raised by volume, block and image operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("block {nr} is out of range (capacity {capacity})")]
    OutOfRange { nr: u32, capacity: u32 },

    #[error("block {nr}: type mismatch ({detail})")]
    TypeMismatch { nr: u32, detail: String },

    #[error("block {nr}: checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { nr: u32, stored: u32, computed: u32 },

    #[error("name '{0}' is longer than 30 characters")]
    NameTooLong(String),

    #[error("name '{0}' is not a valid AmigaDOS name")]
    InvalidName(String),

    #[error("an item named '{0}' already exists")]
    NameExists(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("'{0}' is not a directory")]
    NotADirectory(String),

    #[error("directory '{0}' is not empty")]
    DirectoryNotEmpty(String),

    #[error("volume is full")]
    VolumeFull,

    #[error("invalid volume geometry: {0}")]
    InvalidGeometry(String),

    #[error("unrecognized image format ({0} bytes)")]
    UnrecognizedFormat(usize),

    #[error("block {nr}: inconsistent structure ({detail})")]
    Inconsistent { nr: u32, detail: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub(crate) fn expected(nr: u32, expected: BlockKind, found: BlockKind) -> Self {
        FsError::TypeMismatch {
            nr,
            detail: format!("expected {expected}, found {found}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
