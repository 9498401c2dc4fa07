// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! Exchange of whole directory trees with the host.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::adf_blk::Block;
use crate::adf_err::{FsError, Result};
use crate::volume::Volume;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    File(Vec<u8>),
    Dir(Vec<HostEntry>),
}

/// A file or directory outside the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub name: String,
    pub kind: HostKind,
}

fn host_name(name: &str) -> Result<&str> {
    let escapes = matches!(name, "" | "." | "..") || name.contains(['/', '\\', '\0']);
    if escapes {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(name)
}

impl HostEntry {
    pub fn file(name: &str, bytes: &[u8]) -> Self {
        HostEntry {
            name: name.to_string(),
            kind: HostKind::File(bytes.to_vec()),
        }
    }

    pub fn dir(name: &str, children: Vec<HostEntry>) -> Self {
        HostEntry {
            name: name.to_string(),
            kind: HostKind::Dir(children),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, HostKind::Dir(_))
    }

    /// Reads a host file or directory tree. Children are sorted by name.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if path.is_dir() {
            let mut children = Vec::new();
            for entry in fs::read_dir(path)? {
                children.push(Self::from_path(entry?.path())?);
            }
            children.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(Self::dir(&name, children))
        } else {
            Ok(HostEntry {
                name,
                kind: HostKind::File(fs::read(path)?),
            })
        }
    }

    /// Recreates this entry inside the host directory `parent`.
    ///
    /// Names read from a volume are untrusted; any that could resolve
    /// outside `parent` fail with [`FsError::InvalidName`].
    pub fn write_to(&self, parent: impl AsRef<Path>) -> Result<()> {
        let target = parent.as_ref().join(host_name(&self.name)?);
        match &self.kind {
            HostKind::File(bytes) => fs::write(&target, bytes)?,
            HostKind::Dir(children) => {
                fs::create_dir_all(&target)?;
                for child in children {
                    child.write_to(&target)?;
                }
            }
        }
        Ok(())
    }
}

impl Volume {
    /// Creates the given entries in the current directory. Directories that
    /// already exist are merged into.
    ///
    /// Each item is created atomically; a failure stops the import with the
    /// items created so far left in place.
    pub fn import_tree(&mut self, entries: &[HostEntry]) -> Result<()> {
        let home = self.current_dir();
        let result = self.import_entries(entries);
        self.set_current_dir(home);
        result
    }

    fn import_entries(&mut self, entries: &[HostEntry]) -> Result<()> {
        for entry in entries {
            match &entry.kind {
                HostKind::File(bytes) => {
                    self.make_file(&entry.name, bytes)?;
                }
                HostKind::Dir(children) => {
                    let here = self.current_dir();
                    let dir = match self.seek(&entry.name)? {
                        Some(nr) if self.block(nr)?.is_directory() => nr,
                        Some(_) => return Err(FsError::NameExists(entry.name.clone())),
                        None => self.make_dir(&entry.name)?,
                    };
                    self.set_current_dir(dir);
                    let result = self.import_entries(children);
                    self.set_current_dir(here);
                    result?;
                }
            }
        }
        debug!(entries = entries.len(), "imported host entries");
        Ok(())
    }

    /// Tree of the current directory.
    pub fn export_tree(&self) -> Result<Vec<HostEntry>> {
        self.export_dir(self.current_dir())
    }

    pub fn export_dir(&self, dir: u32) -> Result<Vec<HostEntry>> {
        let mut entries = Vec::new();
        for nr in self.collect(dir, false)? {
            match self.block(nr)? {
                Block::UserDir(b) => {
                    entries.push(HostEntry::dir(&b.name.to_string(), self.export_dir(nr)?));
                }
                Block::FileHeader(b) => {
                    entries.push(HostEntry::file(&b.name.to_string(), &self.read_file(nr)?));
                }
                _ => {}
            }
        }
        Ok(entries)
    }
}
