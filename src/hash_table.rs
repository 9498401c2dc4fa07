// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

//! Directory hash tables.
//!
//! A directory block holds one slot per bucket. Each slot points at the
//! first entry of its bucket; further entries are reached through the
//! hash-chain field of the entry blocks themselves, in insertion order.

use std::collections::HashSet;

use tracing::debug;

use crate::adf_err::{FsError, Result};
use crate::adf_str::FsName;
use crate::store::BlockStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTable {
    slots: Vec<u32>,
}

impl HashTable {
    pub fn new(size: usize) -> Self {
        HashTable {
            slots: vec![0; size],
        }
    }

    pub fn from_slots(slots: Vec<u32>) -> Self {
        HashTable { slots }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    pub fn get(&self, bucket: usize) -> u32 {
        self.slots.get(bucket).copied().unwrap_or(0)
    }

    pub fn set(&mut self, bucket: usize, nr: u32) {
        if let Some(slot) = self.slots.get_mut(bucket) {
            *slot = nr;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|&s| s == 0)
    }

    pub fn bucket_of(&self, name: &FsName, intl: bool) -> usize {
        name.hash_value(self.slots.len() as u32, intl) as usize
    }
}

fn table_of(store: &BlockStore, dir: u32) -> Result<&HashTable> {
    let block = store.at(dir)?;
    block.hash_table().ok_or_else(|| FsError::TypeMismatch {
        nr: dir,
        detail: format!("expected a directory, found {}", block.kind()),
    })
}

fn next_in_chain(store: &BlockStore, nr: u32) -> Result<u32> {
    let block = store.at(nr)?;
    block.hash_chain().ok_or_else(|| FsError::TypeMismatch {
        nr,
        detail: format!("{} in a hash chain", block.kind()),
    })
}

/// Walks one bucket chain starting at `head`, guarding against cycles.
pub fn chain(store: &BlockStore, head: u32) -> Result<Vec<u32>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut nr = head;
    while nr != 0 {
        if !seen.insert(nr) {
            return Err(FsError::Inconsistent {
                nr,
                detail: "hash chain loops back".to_string(),
            });
        }
        entries.push(nr);
        nr = next_in_chain(store, nr)?;
    }
    Ok(entries)
}

/// Finds `name` in directory `dir`.
pub fn lookup(store: &BlockStore, dir: u32, name: &FsName, intl: bool) -> Result<Option<u32>> {
    let table = table_of(store, dir)?;
    let head = table.get(table.bucket_of(name, intl));
    for nr in chain(store, head)? {
        if let Some(entry_name) = store.at(nr)?.name() {
            if entry_name.matches(name, intl) {
                return Ok(Some(nr));
            }
        }
    }
    Ok(None)
}

/// Appends `entry` to the end of its bucket chain in `dir`.
pub fn insert(store: &mut BlockStore, dir: u32, entry: u32, intl: bool) -> Result<()> {
    let name = store
        .at(entry)?
        .name()
        .cloned()
        .ok_or_else(|| FsError::TypeMismatch {
            nr: entry,
            detail: "entry has no name".to_string(),
        })?;
    let bucket = table_of(store, dir)?.bucket_of(&name, intl);
    let head = table_of(store, dir)?.get(bucket);

    store.at_mut(entry)?.set_hash_chain(0);
    store.seal(entry)?;

    if head == 0 {
        if let Some(table) = store.at_mut(dir)?.hash_table_mut() {
            table.set(bucket, entry);
        }
        store.seal(dir)?;
    } else {
        let entries = chain(store, head)?;
        let last = entries.last().copied().unwrap_or(head);
        store.at_mut(last)?.set_hash_chain(entry);
        store.seal(last)?;
    }
    debug!(dir, entry, bucket, "linked hash entry");
    Ok(())
}

/// Unlinks `name` from `dir` and returns the block that held it.
pub fn remove(store: &mut BlockStore, dir: u32, name: &FsName, intl: bool) -> Result<u32> {
    let table = table_of(store, dir)?;
    let bucket = table.bucket_of(name, intl);
    let entries = chain(store, table.get(bucket))?;

    let pos = entries
        .iter()
        .position(|&nr| {
            store
                .at(nr)
                .ok()
                .and_then(|b| b.name())
                .is_some_and(|n| n.matches(name, intl))
        })
        .ok_or_else(|| FsError::NotFound(name.to_string()))?;

    let found = entries[pos];
    let next = next_in_chain(store, found)?;
    if pos == 0 {
        if let Some(table) = store.at_mut(dir)?.hash_table_mut() {
            table.set(bucket, next);
        }
        store.seal(dir)?;
    } else {
        let prev = entries[pos - 1];
        store.at_mut(prev)?.set_hash_chain(next);
        store.seal(prev)?;
    }
    store.at_mut(found)?.set_hash_chain(0);
    store.seal(found)?;
    debug!(dir, entry = found, bucket, "unlinked hash entry");
    Ok(found)
}
