// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;

use crate::adf_err::{FsError, Result};
use crate::consts::{COMMENT_MAX_LEN, FILE_NAME_MAX_LEN};

/// A file, directory or volume name as stored on disk.
///
/// Names are kept as Latin-1 bytes. Equality and hashing ignore case, the
/// same way AmigaDOS looks names up.
#[derive(Debug, Clone, Default)]
pub struct FsName {
    bytes: Vec<u8>,
}

impl FsName {
    pub fn new(name: &str) -> Result<Self> {
        if name.contains(['/', ':']) {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let bytes = latin1(name);
        if bytes.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::NameTooLong(name.to_string()));
        }
        Ok(FsName { bytes })
    }

    /// Builds a name from raw on-disk bytes, clipping anything beyond 30.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let len = raw.len().min(FILE_NAME_MAX_LEN);
        FsName {
            bytes: raw[..len].to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bucket index of this name in a hash table with `table_size` slots.
    pub fn hash_value(&self, table_size: u32, intl: bool) -> u32 {
        let mut seed = self.bytes.len() as u32;
        for &c in &self.bytes {
            seed = (seed.wrapping_mul(13).wrapping_add(to_upper(c, intl) as u32)) & 0x7FF;
        }
        seed % table_size
    }

    pub fn matches(&self, other: &FsName, intl: bool) -> bool {
        self.bytes.len() == other.bytes.len()
            && self
                .bytes
                .iter()
                .zip(other.bytes.iter())
                .all(|(&a, &b)| to_upper(a, intl) == to_upper(b, intl))
    }
}

impl PartialEq for FsName {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other, false)
    }
}

impl Eq for FsName {}

impl fmt::Display for FsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = self.bytes.iter().map(|&b| b as char).collect();
        f.write_str(&s)
    }
}

/// Free-form comment attached to a file or directory (up to 79 bytes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsComment {
    bytes: Vec<u8>,
}

impl FsComment {
    pub fn new(text: &str) -> Self {
        Self::from_bytes(&latin1(text))
    }

    pub fn from_bytes(raw: &[u8]) -> Self {
        let len = raw.len().min(COMMENT_MAX_LEN);
        FsComment {
            bytes: raw[..len].to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for FsComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = self.bytes.iter().map(|&b| b as char).collect();
        f.write_str(&s)
    }
}

fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
        .collect()
}

/// Upper-cases a name byte. The international rule also folds the
/// Latin-1 letters à..þ (except ÷).
pub fn to_upper(c: u8, intl: bool) -> u8 {
    if c.is_ascii_lowercase() || (intl && (224..=254).contains(&c) && c != 247) {
        c - 32
    } else {
        c
    }
}

/// Reads a BCPL string (length byte followed by characters).
pub(crate) fn read_bcpl(buf: &[u8], offset: usize, max: usize) -> &[u8] {
    let len = (buf[offset] as usize).min(max);
    &buf[offset + 1..offset + 1 + len]
}

pub(crate) fn write_bcpl(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset] = bytes.len() as u8;
    buf[offset + 1..offset + 1 + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_amigados() {
        let work = FsName::new("work").unwrap();
        assert_eq!(work.hash_value(72, false), 27);
        assert_eq!(FsName::new("WORK").unwrap().hash_value(72, false), 27);
        assert_eq!(FsName::new("a.txt").unwrap().hash_value(72, false), 48);
        assert_eq!(FsName::new("startup-sequence").unwrap().hash_value(72, false), 49);
        assert_eq!(FsName::new("").unwrap().hash_value(72, false), 0);
    }

    #[test]
    fn names_compare_case_insensitively() {
        let a = FsName::new("Devs").unwrap();
        let b = FsName::new("DEVS").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, FsName::new("Dev").unwrap());
    }

    #[test]
    fn intl_folds_latin1() {
        let a = FsName::new("àb").unwrap();
        let b = FsName::new("ÀB").unwrap();
        assert!(a.matches(&b, true));
        assert!(!a.matches(&b, false));
        assert_eq!(to_upper(247, true), 247);
    }

    #[test]
    fn long_names_are_rejected() {
        let name = "x".repeat(31);
        assert!(matches!(FsName::new(&name), Err(FsError::NameTooLong(_))));
        assert!(FsName::new(&"x".repeat(30)).is_ok());
        assert!(matches!(FsName::new("a/b"), Err(FsError::InvalidName(_))));
    }
}
