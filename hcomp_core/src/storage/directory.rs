use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{HcompError, Result};
use crate::tag::{Ref, Tag, DFTAG_NULL};

/// Locates one element's bytes (or special header) inside the block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub tag: Tag,
    pub reference: Ref,
    pub offset: u64,
    pub length: u32,
}

/// Size of one serialized directory entry.
///   tag:u16 + ref:u16 + offset:u64 + length:u32 = 16
pub const DIR_ENTRY_SIZE: usize = 16;

impl DirEntry {
    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        buf[0..2].copy_from_slice(&self.tag.to_be_bytes());
        buf[2..4].copy_from_slice(&self.reference.to_be_bytes());
        buf[4..12].copy_from_slice(&self.offset.to_be_bytes());
        buf[12..16].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; DIR_ENTRY_SIZE]) -> Self {
        Self {
            tag: u16::from_be_bytes([buf[0], buf[1]]),
            reference: u16::from_be_bytes([buf[2], buf[3]]),
            offset: u64::from_be_bytes([
                buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
            ]),
            length: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

/// The file's tag/reference directory.
pub trait DirectoryIndex {
    fn lookup(&self, tag: Tag, reference: Ref) -> Option<DirEntry>;

    /// Register a new entry; the (tag, reference) key must be unused.
    fn insert(&mut self, entry: DirEntry) -> Result<()>;

    /// Remove and return the entry for (tag, reference).
    fn delete(&mut self, tag: Tag, reference: Ref) -> Result<DirEntry>;

    /// A reference number not used by any entry, whatever its tag.
    fn new_ref(&mut self) -> Result<Ref>;

    /// All entries, ordered by (tag, reference).
    fn entries(&self) -> Vec<DirEntry>;
}

/// Directory kept in a sorted in-memory map.
#[derive(Debug, Default, Clone)]
pub struct MemDirectory {
    entries: BTreeMap<(Tag, Ref), DirEntry>,
    max_ref: Ref,
}

impl MemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ref_in_use(&self, reference: Ref) -> bool {
        self.entries.values().any(|e| e.reference == reference)
    }
}

impl DirectoryIndex for MemDirectory {
    fn lookup(&self, tag: Tag, reference: Ref) -> Option<DirEntry> {
        self.entries.get(&(tag, reference)).copied()
    }

    fn insert(&mut self, entry: DirEntry) -> Result<()> {
        let fail = |reason: &str| HcompError::Directory {
            op: "insert",
            tag: entry.tag,
            reference: entry.reference,
            reason: reason.to_string(),
        };
        if entry.tag == DFTAG_NULL {
            return Err(fail("null tag"));
        }
        if self.entries.contains_key(&(entry.tag, entry.reference)) {
            return Err(fail("key already present"));
        }
        self.max_ref = self.max_ref.max(entry.reference);
        self.entries.insert((entry.tag, entry.reference), entry);
        Ok(())
    }

    fn delete(&mut self, tag: Tag, reference: Ref) -> Result<DirEntry> {
        self.entries
            .remove(&(tag, reference))
            .ok_or_else(|| HcompError::Directory {
                op: "delete",
                tag,
                reference,
                reason: "no such entry".to_string(),
            })
    }

    fn new_ref(&mut self) -> Result<Ref> {
        if self.max_ref < Ref::MAX {
            self.max_ref += 1;
            return Ok(self.max_ref);
        }
        (1..=Ref::MAX)
            .find(|&r| !self.ref_in_use(r))
            .ok_or_else(|| HcompError::ResourceExhausted("no free reference numbers".to_string()))
    }

    fn entries(&self) -> Vec<DirEntry> {
        self.entries.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn entry(tag: Tag, reference: Ref) -> DirEntry {
        DirEntry {
            tag,
            reference,
            offset: 64,
            length: 10,
        }
    }

    #[test]
    fn insert_lookup_delete() {
        let mut dir = MemDirectory::new();
        dir.insert(entry(300, 2)).unwrap();
        assert_eq!(dir.lookup(300, 2), Some(entry(300, 2)));
        assert_eq!(dir.lookup(300, 3), None);
        assert_eq!(dir.delete(300, 2).unwrap(), entry(300, 2));
        assert!(dir.is_empty());
    }

    #[test]
    fn duplicate_and_missing_keys_are_directory_errors() {
        let mut dir = MemDirectory::new();
        dir.insert(entry(300, 2)).unwrap();
        assert_eq!(dir.insert(entry(300, 2)).unwrap_err().kind(), ErrorKind::DirectoryIo);
        assert_eq!(dir.delete(301, 2).unwrap_err().kind(), ErrorKind::DirectoryIo);
        assert_eq!(dir.insert(entry(DFTAG_NULL, 9)).unwrap_err().kind(), ErrorKind::DirectoryIo);
    }

    #[test]
    fn new_refs_skip_existing_ones() {
        let mut dir = MemDirectory::new();
        dir.insert(entry(300, 7)).unwrap();
        assert_eq!(dir.new_ref().unwrap(), 8);
        assert_eq!(dir.new_ref().unwrap(), 9);
    }

    #[test]
    fn new_ref_reuses_gaps_once_the_top_is_taken() {
        let mut dir = MemDirectory::new();
        dir.insert(entry(300, Ref::MAX)).unwrap();
        dir.insert(entry(300, 1)).unwrap();
        assert_eq!(dir.new_ref().unwrap(), 2);
    }

    #[test]
    fn entry_bytes_are_big_endian() {
        let e = DirEntry {
            tag: 0x4123,
            reference: 2,
            offset: 0x0102,
            length: 0x0a0b0c0d,
        };
        let bytes = e.to_bytes();
        assert_eq!(&bytes[0..4], &[0x41, 0x23, 0x00, 0x02]);
        assert_eq!(&bytes[12..16], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(DirEntry::from_bytes(&bytes), e);
    }
}
