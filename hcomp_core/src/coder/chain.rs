//! Encoded segments of one compressed element, linked through the block store.
//!
//! ```text
//! [raw_len:u32][enc_len:u32][next:u64][payload: enc_len bytes]
//! ```
//! The compressed-data directory entry points at the first segment and its
//! length covers every segment block. Each segment decodes on its own, so
//! a reader can start at any segment boundary.

use crate::error::{HcompError, Result};
use crate::storage::{DirEntry, Storage};
use crate::tag::{Ref, DFTAG_COMPRESSED};

/// raw_len:u32 + enc_len:u32 + next:u64 = 16
pub const SEGMENT_HEADER_SIZE: u64 = 16;

const NEXT_FIELD_OFFSET: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Block store offset of the segment header.
    pub offset: u64,
    /// Logical position of the segment's first byte.
    pub raw_start: u64,
    pub raw_len: u32,
    pub enc_len: u32,
}

impl Segment {
    pub fn raw_end(&self) -> u64 {
        self.raw_start + self.raw_len as u64
    }

    fn block_len(&self) -> u64 {
        SEGMENT_HEADER_SIZE + self.enc_len as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentChain {
    comp_ref: Ref,
    segments: Vec<Segment>,
}

impl SegmentChain {
    /// Walk the chain registered under (`DFTAG_COMPRESSED`, `comp_ref`).
    pub fn load(storage: &mut Storage, comp_ref: Ref) -> Result<Self> {
        let entry = Self::entry(storage, comp_ref)?;
        let mut chain = Self {
            comp_ref,
            segments: Vec::new(),
        };

        let corrupt = |why: String| {
            HcompError::BadHeader(format!("segment chain of compressed data {comp_ref}: {why}"))
        };

        let mut next = entry.offset;
        let mut walked = 0u64;
        let mut raw_start = 0u64;
        while walked < entry.length as u64 {
            if next == 0 {
                return Err(corrupt(format!(
                    "ends after {walked} of {} bytes",
                    entry.length
                )));
            }
            let mut hdr = [0u8; SEGMENT_HEADER_SIZE as usize];
            storage.store.read_at(next, &mut hdr)?;
            let segment = Segment {
                offset: next,
                raw_start,
                raw_len: u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]),
                enc_len: u32::from_be_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]),
            };
            next = u64::from_be_bytes([
                hdr[8], hdr[9], hdr[10], hdr[11], hdr[12], hdr[13], hdr[14], hdr[15],
            ]);
            walked += segment.block_len();
            raw_start = segment.raw_end();
            chain.segments.push(segment);
        }
        if walked != entry.length as u64 || (entry.length > 0 && next != 0) {
            return Err(corrupt(format!(
                "spans {walked} bytes but the directory records {}",
                entry.length
            )));
        }

        tracing::trace!(comp_ref, segments = chain.segments.len(), "loaded segment chain");
        Ok(chain)
    }

    fn entry(storage: &Storage, comp_ref: Ref) -> Result<DirEntry> {
        storage
            .dir
            .lookup(DFTAG_COMPRESSED, comp_ref)
            .ok_or(HcompError::NotFound {
                tag: DFTAG_COMPRESSED,
                reference: comp_ref,
            })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, idx: usize) -> Option<&Segment> {
        self.segments.get(idx)
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Raw bytes covered by all segments.
    pub fn raw_len(&self) -> u64 {
        self.segments.last().map_or(0, Segment::raw_end)
    }

    /// Bytes of block storage the chain occupies.
    pub fn encoded_len(&self) -> u64 {
        self.segments.iter().map(Segment::block_len).sum()
    }

    /// Index of the segment holding logical position `pos`.
    pub fn locate(&self, pos: u64) -> Option<usize> {
        let idx = self.segments.partition_point(|s| s.raw_end() <= pos);
        (idx < self.segments.len()).then_some(idx)
    }

    pub fn read_payload(&self, storage: &mut Storage, idx: usize) -> Result<Vec<u8>> {
        let segment = self.segments.get(idx).ok_or_else(|| {
            HcompError::Range(format!("segment {idx} of {} does not exist", self.len()))
        })?;
        let mut payload = vec![0u8; segment.enc_len as usize];
        storage
            .store
            .read_at(segment.offset + SEGMENT_HEADER_SIZE, &mut payload)?;
        Ok(payload)
    }

    /// Store one encoded segment at the end of the chain.
    pub fn append(&mut self, storage: &mut Storage, raw_len: u32, encoded: &[u8]) -> Result<()> {
        let enc_len = u32::try_from(encoded.len()).map_err(|_| {
            HcompError::ResourceExhausted(format!("segment of {} bytes", encoded.len()))
        })?;
        let segment = Segment {
            offset: 0,
            raw_start: self.raw_len(),
            raw_len,
            enc_len,
        };
        let total = self.encoded_len() + segment.block_len();
        let total = u32::try_from(total).map_err(|_| {
            HcompError::ResourceExhausted(format!(
                "compressed data {} would grow past {} bytes",
                self.comp_ref,
                u32::MAX
            ))
        })?;

        let mut block = Vec::with_capacity(segment.block_len() as usize);
        block.extend_from_slice(&raw_len.to_be_bytes());
        block.extend_from_slice(&enc_len.to_be_bytes());
        block.extend_from_slice(&0u64.to_be_bytes());
        block.extend_from_slice(encoded);

        let offset = storage.store.allocate(block.len() as u64)?;
        storage.store.write_at(offset, &block)?;

        let first = match self.segments.last() {
            Some(prev) => {
                storage
                    .store
                    .write_at(prev.offset + NEXT_FIELD_OFFSET, &offset.to_be_bytes())?;
                self.segments[0].offset
            }
            None => offset,
        };
        self.replace_entry(storage, first, total)?;
        self.segments.push(Segment { offset, ..segment });
        Ok(())
    }

    /// Unlink the last segment so it can be re-encoded together with
    /// following data. Its block is abandoned.
    pub fn pop(&mut self, storage: &mut Storage) -> Result<Option<Segment>> {
        let Some(&last) = self.segments.last() else {
            return Ok(None);
        };
        let remaining = &self.segments[..self.segments.len() - 1];
        let total = (self.encoded_len() - last.block_len()) as u32;
        let first = match remaining.last() {
            Some(prev) => {
                storage
                    .store
                    .write_at(prev.offset + NEXT_FIELD_OFFSET, &0u64.to_be_bytes())?;
                remaining[0].offset
            }
            None => 0,
        };
        self.replace_entry(storage, first, total)?;
        self.segments.pop();
        Ok(Some(last))
    }

    fn replace_entry(&self, storage: &mut Storage, offset: u64, length: u32) -> Result<()> {
        storage.dir.delete(DFTAG_COMPRESSED, self.comp_ref)?;
        storage.dir.insert(DirEntry {
            tag: DFTAG_COMPRESSED,
            reference: self.comp_ref,
            offset,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve(storage: &mut Storage, comp_ref: Ref) {
        // keep segments away from offset 0
        storage.store.allocate(8).unwrap();
        storage
            .dir
            .insert(DirEntry {
                tag: DFTAG_COMPRESSED,
                reference: comp_ref,
                offset: 0,
                length: 0,
            })
            .unwrap();
    }

    #[test]
    fn appended_segments_reload_in_order() {
        let mut storage = Storage::in_memory();
        reserve(&mut storage, 5);

        let mut chain = SegmentChain::load(&mut storage, 5).unwrap();
        assert!(chain.is_empty());
        chain.append(&mut storage, 10, b"abc").unwrap();
        chain.append(&mut storage, 20, b"defgh").unwrap();
        chain.append(&mut storage, 4, b"").unwrap();

        let entry = storage.dir.lookup(DFTAG_COMPRESSED, 5).unwrap();
        assert_eq!(entry.length as u64, 3 * SEGMENT_HEADER_SIZE + 8);
        assert_eq!(entry.offset, chain.segment(0).unwrap().offset);

        let reloaded = SegmentChain::load(&mut storage, 5).unwrap();
        assert_eq!(reloaded.segments, chain.segments);
        assert_eq!(reloaded.raw_len(), 34);
        assert_eq!(reloaded.read_payload(&mut storage, 1).unwrap(), b"defgh");
    }

    #[test]
    fn locate_maps_positions_to_segments() {
        let mut storage = Storage::in_memory();
        reserve(&mut storage, 1);
        let mut chain = SegmentChain::load(&mut storage, 1).unwrap();
        chain.append(&mut storage, 10, b"a").unwrap();
        chain.append(&mut storage, 10, b"b").unwrap();

        assert_eq!(chain.locate(0), Some(0));
        assert_eq!(chain.locate(9), Some(0));
        assert_eq!(chain.locate(10), Some(1));
        assert_eq!(chain.locate(19), Some(1));
        assert_eq!(chain.locate(20), None);
    }

    #[test]
    fn pop_unlinks_the_tail() {
        let mut storage = Storage::in_memory();
        reserve(&mut storage, 3);
        let mut chain = SegmentChain::load(&mut storage, 3).unwrap();
        chain.append(&mut storage, 6, b"first").unwrap();
        chain.append(&mut storage, 2, b"tail").unwrap();

        let popped = chain.pop(&mut storage).unwrap().unwrap();
        assert_eq!(popped.raw_len, 2);
        let reloaded = SegmentChain::load(&mut storage, 3).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.raw_len(), 6);

        chain.pop(&mut storage).unwrap();
        let reloaded = SegmentChain::load(&mut storage, 3).unwrap();
        assert!(reloaded.is_empty());
        assert_eq!(storage.dir.lookup(DFTAG_COMPRESSED, 3).unwrap().length, 0);
    }

    #[test]
    fn missing_entry_is_not_found() {
        let mut storage = Storage::in_memory();
        let err = SegmentChain::load(&mut storage, 9).unwrap_err();
        assert!(matches!(err, HcompError::NotFound { tag: DFTAG_COMPRESSED, reference: 9 }));
    }
}
