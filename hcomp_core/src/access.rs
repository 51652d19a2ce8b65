//! Access handles: one cursor over one element, addressed by a
//! generation-checked [`Aid`].

use std::fmt;

use serde::Serialize;

use crate::coder::{CoderStatus, CoderType};
use crate::element::{ElementInfo, SharedInfo};
use crate::error::{HcompError, Result};
use crate::format;
use crate::model::ModelType;
use crate::storage::{DirEntry, Storage};
use crate::tag::{Ref, Tag, DFTAG_COMPRESSED, SPECIAL_COMP};

/// Process-unique id of an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl AccessMode {
    pub fn can_write(self) -> bool {
        self == AccessMode::ReadWrite
    }
}

/// Origin of a relative seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Handle to an open access record. Stale handles are detected by
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Aid {
    slot: u32,
    generation: u32,
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// Result of [`AccessRecord::inquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Inquiry {
    pub file_id: FileId,
    pub tag: Tag,
    pub reference: Ref,
    /// Logical length of the element.
    pub length: u32,
    /// Block offset of the element's header.
    pub offset: u64,
    pub position: u32,
    pub access: AccessMode,
    /// Special-element marker.
    pub special: i16,
}

/// Result of [`AccessRecord::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpecialInfo {
    pub key: i16,
    pub coder: CoderType,
    pub model: ModelType,
    /// Bytes the encoded data occupies in the block store.
    pub comp_size: u32,
    pub status: CoderStatus,
}

#[derive(Debug)]
pub struct AccessRecord {
    file_id: FileId,
    header: DirEntry,
    posn: u32,
    access: AccessMode,
    appendable: bool,
    needs_flush: bool,
    info: SharedInfo,
}

impl AccessRecord {
    pub fn new(file_id: FileId, header: DirEntry, access: AccessMode, info: SharedInfo) -> Self {
        Self {
            file_id,
            header,
            posn: 0,
            access,
            appendable: access.can_write(),
            needs_flush: false,
            info,
        }
    }

    /// Key of the element's header entry.
    pub fn key(&self) -> (Tag, Ref) {
        (self.header.tag, self.header.reference)
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn position(&self) -> u32 {
        self.posn
    }

    pub fn appendable(&self) -> bool {
        self.appendable
    }

    pub fn needs_flush(&self) -> bool {
        self.needs_flush
    }

    pub fn shared_info(&self) -> &SharedInfo {
        &self.info
    }

    /// Run the model's open hook for this record's mode.
    pub fn start(&mut self, storage: &mut Storage) -> Result<()> {
        let mut info = self.info.borrow_mut();
        let ElementInfo { model, coder, .. } = &mut *info;
        match self.access {
            AccessMode::Read => model.stread(coder, storage),
            AccessMode::ReadWrite => model.stwrite(coder, storage),
        }
    }

    pub fn seek(&mut self, offset: i32, whence: Whence) -> Result<u32> {
        let mut info = self.info.borrow_mut();
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.posn as i64,
            Whence::End => info.length as i64,
        };
        let target = base + offset as i64;
        if target < 0 {
            return Err(HcompError::Range(format!(
                "seek to {target} is before the start of the element"
            )));
        }
        let target = u32::try_from(target)
            .ok()
            .filter(|t| i32::try_from(*t).is_ok())
            .ok_or_else(|| HcompError::Range(format!("seek to {target} is out of range")))?;

        let ElementInfo { model, coder, .. } = &mut *info;
        model.seek(coder, target as u64)?;
        self.posn = target;
        Ok(target)
    }

    /// Read `len` bytes at the cursor; 0 means through the end.
    pub fn read(&mut self, storage: &mut Storage, len: u32) -> Result<Vec<u8>> {
        let mut info = self.info.borrow_mut();
        let len = if len == 0 {
            info.length.saturating_sub(self.posn)
        } else if self.posn as u64 + len as u64 > info.length as u64 {
            return Err(HcompError::Range(format!(
                "read of {len} bytes at {} passes the element length {}",
                self.posn, info.length
            )));
        } else {
            len
        };

        let ElementInfo { model, coder, .. } = &mut *info;
        let data = model.read(coder, storage, self.posn as u64, len as usize)?;
        self.posn += len;
        Ok(data)
    }

    pub fn write(&mut self, storage: &mut Storage, data: &[u8]) -> Result<usize> {
        if !self.access.can_write() {
            return Err(HcompError::PermissionDenied(format!(
                "handle on {}/{} is read-only",
                self.header.tag, self.header.reference
            )));
        }
        let end = self.posn as u64 + data.len() as u64;
        let end = u32::try_from(end)
            .ok()
            .filter(|e| i32::try_from(*e).is_ok())
            .ok_or_else(|| {
                HcompError::Range(format!("write would grow the element to {end} bytes"))
            })?;

        let mut info = self.info.borrow_mut();
        let (header, old_length) = (info.header, info.length);
        let grows = end > old_length;
        if grows {
            format::patch_length(storage, &header, end)?;
        }

        let ElementInfo { model, coder, .. } = &mut *info;
        let written = match model.write(coder, storage, self.posn as u64, data) {
            Ok(written) => written,
            Err(err) => {
                if grows {
                    if let Err(undo) = format::patch_length(storage, &header, old_length) {
                        tracing::warn!(%undo, "could not restore element length after failed write");
                    }
                }
                return Err(err);
            }
        };

        if grows {
            info.length = end;
        }
        self.posn = end;
        self.needs_flush = true;
        Ok(written)
    }

    /// Commit buffered bytes to storage.
    pub fn flush(&mut self, storage: &mut Storage) -> Result<()> {
        let mut info = self.info.borrow_mut();
        info.coder.commit(storage)?;
        self.needs_flush = false;
        Ok(())
    }

    pub fn inquire(&self) -> Inquiry {
        let info = self.info.borrow();
        Inquiry {
            file_id: self.file_id,
            tag: self.header.tag,
            reference: self.header.reference,
            length: info.length,
            offset: self.header.offset,
            position: self.posn,
            access: self.access,
            special: SPECIAL_COMP,
        }
    }

    pub fn info(&self, storage: &Storage) -> SpecialInfo {
        let info = self.info.borrow();
        let comp_size = storage
            .dir
            .lookup(DFTAG_COMPRESSED, info.comp_ref)
            .map_or(0, |e| e.length);
        SpecialInfo {
            key: SPECIAL_COMP,
            coder: info.coder.coder().coder_type(),
            model: info.model.model_type(),
            comp_size,
            status: info.model.inquire(&info.coder),
        }
    }

    pub fn end_access(&mut self, storage: &mut Storage) -> Result<()> {
        let mut info = self.info.borrow_mut();
        let ElementInfo { model, coder, .. } = &mut *info;
        model.end_access(coder, storage)?;
        self.needs_flush = false;
        Ok(())
    }
}

struct Slot {
    generation: u32,
    record: Option<AccessRecord>,
}

/// Bounded table of open access records.
pub struct HandleArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl HandleArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_full(&self) -> bool {
        self.live >= self.capacity
    }

    pub fn insert(&mut self, record: AccessRecord) -> Result<Aid> {
        if self.is_full() {
            return Err(HcompError::ResourceExhausted(format!(
                "all {} access handles are in use",
                self.capacity
            )));
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    record: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        entry.record = Some(record);
        self.live += 1;
        Ok(Aid {
            slot,
            generation: entry.generation,
        })
    }

    fn slot(&self, aid: Aid) -> Option<&Slot> {
        self.slots
            .get(aid.slot as usize)
            .filter(|s| s.generation == aid.generation)
    }

    pub fn get(&self, aid: Aid) -> Result<&AccessRecord> {
        self.slot(aid)
            .and_then(|s| s.record.as_ref())
            .ok_or_else(|| HcompError::BadAid(aid.to_string()))
    }

    pub fn get_mut(&mut self, aid: Aid) -> Result<&mut AccessRecord> {
        self.slots
            .get_mut(aid.slot as usize)
            .filter(|s| s.generation == aid.generation)
            .and_then(|s| s.record.as_mut())
            .ok_or_else(|| HcompError::BadAid(aid.to_string()))
    }

    pub fn remove(&mut self, aid: Aid) -> Result<AccessRecord> {
        let slot = self
            .slots
            .get_mut(aid.slot as usize)
            .filter(|s| s.generation == aid.generation && s.record.is_some())
            .ok_or_else(|| HcompError::BadAid(aid.to_string()))?;
        let record = slot.record.take().ok_or_else(|| HcompError::BadAid(aid.to_string()))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(aid.slot);
        self.live -= 1;
        Ok(record)
    }

    /// Handles currently open, in slot order.
    pub fn aids(&self) -> Vec<Aid> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.record.is_some())
            .map(|(i, s)| Aid {
                slot: i as u32,
                generation: s.generation,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::{Coder, CoderState};
    use crate::error::ErrorKind;
    use crate::model::Model;

    fn record(access: AccessMode) -> AccessRecord {
        let header = DirEntry {
            tag: 0x4000 | 9,
            reference: 1,
            offset: 0,
            length: 14,
        };
        let coder = CoderState::new(Coder::None, 2, 64);
        let info = ElementInfo::new(10, 2, Model::Stdio, coder, header).shared();
        AccessRecord::new(FileId(1), header, access, info)
    }

    #[test]
    fn seek_is_bounded_below_only() {
        let mut rec = record(AccessMode::Read);
        let mut storage = Storage::in_memory();
        storage
            .dir
            .insert(DirEntry {
                tag: DFTAG_COMPRESSED,
                reference: 2,
                offset: 0,
                length: 0,
            })
            .unwrap();
        rec.start(&mut storage).unwrap();

        assert_eq!(rec.seek(4, Whence::Start).unwrap(), 4);
        assert_eq!(rec.seek(-2, Whence::Current).unwrap(), 2);
        assert_eq!(rec.seek(5, Whence::End).unwrap(), 15);
        assert_eq!(rec.seek(-11, Whence::End).unwrap_err().kind(), ErrorKind::Range);
        assert_eq!(rec.position(), 15);
    }

    #[test]
    fn read_only_records_refuse_writes() {
        let mut rec = record(AccessMode::Read);
        let mut storage = Storage::in_memory();
        let err = rec.write(&mut storage, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!rec.appendable());
    }

    #[test]
    fn arena_detects_stale_handles() {
        let mut arena = HandleArena::new(2);
        let a = arena.insert(record(AccessMode::Read)).unwrap();
        let b = arena.insert(record(AccessMode::Read)).unwrap();
        assert!(arena.is_full());
        assert_eq!(
            arena.insert(record(AccessMode::Read)).unwrap_err().kind(),
            ErrorKind::ResourceExhausted
        );

        arena.remove(a).unwrap();
        assert_eq!(arena.get(a).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(arena.remove(a).is_err());

        let c = arena.insert(record(AccessMode::ReadWrite)).unwrap();
        assert_ne!(a, c);
        assert!(arena.get(a).is_err());
        assert!(arena.get_mut(c).unwrap().access().can_write());
        assert_eq!(arena.aids(), vec![c, b]);
        assert_eq!(arena.len(), 2);
    }
}
