//! Collaborators underneath the engine: raw block storage, the tag/reference
//! directory, and the container file that persists both.

pub mod block;
pub mod container;
pub mod directory;

pub use block::{BlockStore, FileStore, MemStore};
pub use directory::{DirEntry, DirectoryIndex, MemDirectory};

/// The block store and directory of one open file, borrowed together by
/// every layer that touches disk.
pub struct Storage {
    pub store: Box<dyn BlockStore>,
    pub dir: Box<dyn DirectoryIndex>,
}

impl Storage {
    pub fn new(store: Box<dyn BlockStore>, dir: Box<dyn DirectoryIndex>) -> Self {
        Self { store, dir }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemStore::new()), Box::new(MemDirectory::new()))
    }

    /// Read the whole payload a directory entry points at.
    pub fn read_entry(&mut self, entry: &DirEntry) -> crate::Result<Vec<u8>> {
        let mut buf = vec![0u8; entry.length as usize];
        self.store.read_at(entry.offset, &mut buf)?;
        Ok(buf)
    }
}
