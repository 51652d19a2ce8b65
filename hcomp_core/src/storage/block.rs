use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{HcompError, Result};

/// Raw byte storage underneath every element.
///
/// Space is only ever handed out by [`allocate`](BlockStore::allocate); reads
/// and writes must stay inside allocated space. The cursor set by
/// [`seek`](BlockStore::seek) advances with every read and write.
pub trait BlockStore {
    /// Reserve `len` zeroed bytes and return their offset.
    fn allocate(&mut self, len: u64) -> Result<u64>;

    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Fill `buf` from the cursor.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Bytes allocated so far.
    fn size(&self) -> u64;

    /// Push buffered writes down to durable storage.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(offset)?;
        self.read(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.seek(offset)?;
        self.write(data)
    }
}

fn out_of_bounds(what: &str, pos: u64, len: usize, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{what} of {len} bytes at {pos} runs past allocated size {size}"),
    )
}

/// Block store backed by a growable byte vector.
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    data: Vec<u8>,
    pos: u64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemStore {
    fn allocate(&mut self, len: u64) -> Result<u64> {
        let offset = self.data.len() as u64;
        let end = offset
            .checked_add(len)
            .and_then(|end| usize::try_from(end).ok())
            .ok_or_else(|| HcompError::ResourceExhausted(format!("cannot allocate {len} bytes")))?;
        self.data.resize(end, 0);
        Ok(offset)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.pos = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.pos as usize;
        let src = self
            .data
            .get(start..start + buf.len())
            .ok_or_else(|| out_of_bounds("read", self.pos, buf.len(), self.size()))
            .map_err(HcompError::storage("read"))?;
        buf.copy_from_slice(src);
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let start = self.pos as usize;
        let size = self.size();
        let dst = self
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| out_of_bounds("write", start as u64, data.len(), size))
            .map_err(HcompError::storage("write"))?;
        dst.copy_from_slice(data);
        self.pos += data.len() as u64;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Block store backed by a file on disk.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    end: u64,
    pos: u64,
}

impl FileStore {
    /// Create (or truncate) a store file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(HcompError::storage("create"))?;
        Ok(Self { file, end: 0, pos: 0 })
    }

    /// Open an existing store file.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(HcompError::storage("open"))?;
        let end = file.metadata().map_err(HcompError::storage("open"))?.len();
        Ok(Self { file, end, pos: 0 })
    }
}

impl BlockStore for FileStore {
    fn allocate(&mut self, len: u64) -> Result<u64> {
        let offset = self.end;
        let end = offset
            .checked_add(len)
            .ok_or_else(|| HcompError::ResourceExhausted(format!("cannot allocate {len} bytes")))?;
        self.file.set_len(end).map_err(HcompError::storage("allocate"))?;
        self.end = end;
        Ok(offset)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(HcompError::storage("seek"))?;
        self.pos = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.pos + buf.len() as u64 > self.end {
            return Err(HcompError::storage("read")(out_of_bounds(
                "read",
                self.pos,
                buf.len(),
                self.end,
            )));
        }
        self.file.read_exact(buf).map_err(HcompError::storage("read"))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.pos + data.len() as u64 > self.end {
            return Err(HcompError::storage("write")(out_of_bounds(
                "write",
                self.pos,
                data.len(),
                self.end,
            )));
        }
        self.file.write_all(data).map_err(HcompError::storage("write"))?;
        self.pos += data.len() as u64;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.end
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush().map_err(HcompError::storage("sync"))?;
        self.file.sync_data().map_err(HcompError::storage("sync"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn mem_store_allocates_sequentially() {
        let mut store = MemStore::new();
        assert_eq!(store.allocate(10).unwrap(), 0);
        assert_eq!(store.allocate(4).unwrap(), 10);
        store.write_at(10, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        store.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
        assert_eq!(store.size(), 14);
    }

    #[test]
    fn mem_store_rejects_access_past_allocation() {
        let mut store = MemStore::new();
        store.allocate(4).unwrap();
        let err = store.write_at(2, b"xyz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageIo);
        let mut buf = [0u8; 5];
        assert_eq!(store.read_at(0, &mut buf).unwrap_err().kind(), ErrorKind::StorageIo);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");

        let mut store = FileStore::create(&path).unwrap();
        let off = store.allocate(6).unwrap();
        store.write_at(off, b"hello!").unwrap();
        store.sync().unwrap();
        drop(store);

        let mut store = FileStore::open(&path, false).unwrap();
        assert_eq!(store.size(), 6);
        let mut buf = [0u8; 6];
        store.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello!");
        assert!(store.read_at(4, &mut buf).is_err());
    }
}
