//! Single-file container: a superblock, element blocks, and a directory table.
//!
//! ```text
//! [SUPERBLOCK: magic "HCMP" + dd_offset:u64]
//! [BLOCK] [BLOCK] ...                       ← headers, segments, plain data
//! [DIRECTORY TABLE: count:u32 + 16 bytes × count]
//! ```
//! The directory table is appended on every save and `dd_offset` patched to
//! point at the newest copy.

use crate::error::{HcompError, Result};
use crate::storage::block::BlockStore;
use crate::storage::directory::{DirEntry, DirectoryIndex, MemDirectory, DIR_ENTRY_SIZE};

pub const CONTAINER_MAGIC: &[u8; 4] = b"HCMP";

/// magic[4] + dd_offset:u64 = 12
pub const SUPERBLOCK_SIZE: u64 = 12;

/// Write a fresh superblock into an empty store.
pub fn init(store: &mut dyn BlockStore) -> Result<()> {
    let offset = store.allocate(SUPERBLOCK_SIZE)?;
    if offset != 0 {
        return Err(HcompError::InvalidArgument(
            "container superblock must be the first block".to_string(),
        ));
    }
    let mut sb = [0u8; SUPERBLOCK_SIZE as usize];
    sb[..4].copy_from_slice(CONTAINER_MAGIC);
    store.write_at(0, &sb)
}

fn read_superblock(store: &mut dyn BlockStore) -> Result<u64> {
    let mut sb = [0u8; SUPERBLOCK_SIZE as usize];
    store.read_at(0, &mut sb)?;
    if &sb[..4] != CONTAINER_MAGIC {
        return Err(HcompError::InvalidArgument(
            "invalid container magic bytes".to_string(),
        ));
    }
    let mut dd_offset = [0u8; 8];
    dd_offset.copy_from_slice(&sb[4..12]);
    Ok(u64::from_be_bytes(dd_offset))
}

/// Load the most recently saved directory table.
pub fn load_directory(store: &mut dyn BlockStore) -> Result<MemDirectory> {
    let dd_offset = read_superblock(store)?;
    let mut dir = MemDirectory::new();
    if dd_offset == 0 {
        return Ok(dir);
    }

    let mut count = [0u8; 4];
    store.read_at(dd_offset, &mut count)?;
    let count = u32::from_be_bytes(count);

    let mut buf = [0u8; DIR_ENTRY_SIZE];
    for _ in 0..count {
        store.read(&mut buf)?;
        dir.insert(DirEntry::from_bytes(&buf))?;
    }
    Ok(dir)
}

/// Append the directory table and point the superblock at it.
pub fn save_directory(store: &mut dyn BlockStore, dir: &dyn DirectoryIndex) -> Result<()> {
    let entries = dir.entries();
    let mut table = Vec::with_capacity(4 + entries.len() * DIR_ENTRY_SIZE);
    table.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in &entries {
        table.extend_from_slice(&entry.to_bytes());
    }

    let dd_offset = store.allocate(table.len() as u64)?;
    store.write_at(dd_offset, &table)?;
    store.write_at(4, &dd_offset.to_be_bytes())?;
    store.sync()?;
    tracing::debug!(entries = entries.len(), dd_offset, "saved directory table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::MemStore;

    #[test]
    fn empty_container_has_empty_directory() {
        let mut store = MemStore::new();
        init(&mut store).unwrap();
        assert!(load_directory(&mut store).unwrap().is_empty());
    }

    #[test]
    fn latest_table_wins() {
        let mut store = MemStore::new();
        init(&mut store).unwrap();

        let mut dir = MemDirectory::new();
        dir.insert(DirEntry { tag: 300, reference: 1, offset: 12, length: 3 }).unwrap();
        save_directory(&mut store, &dir).unwrap();

        dir.insert(DirEntry { tag: 300, reference: 2, offset: 15, length: 9 }).unwrap();
        save_directory(&mut store, &dir).unwrap();

        let loaded = load_directory(&mut store).unwrap();
        assert_eq!(loaded.entries(), dir.entries());
    }

    #[test]
    fn foreign_files_are_rejected() {
        let mut store = MemStore::new();
        store.allocate(SUPERBLOCK_SIZE).unwrap();
        store.write_at(0, b"NOPE").unwrap();
        assert!(load_directory(&mut store).is_err());
    }
}
