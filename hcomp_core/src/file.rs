//! Element lifecycle manager: creates, opens and closes compressed elements
//! of one file and routes handle operations to them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::access::{AccessMode, AccessRecord, Aid, FileId, HandleArena, Inquiry, SpecialInfo, Whence};
use crate::coder::{Coder, CoderInfo, CoderState};
use crate::config::FileOptions;
use crate::element::ElementInfo;
use crate::error::{HcompError, Result};
use crate::format::{self, CompHeader, COMP_START_BLOCK};
use crate::model::{Model, ModelType};
use crate::storage::{container, DirEntry, FileStore, MemDirectory, Storage};
use crate::tag::{base_tag, is_special, special_tag, Ref, Tag, DFTAG_COMPRESSED, DFTAG_NULL, SPECIAL_COMP};

/// Access granted on a whole file.
pub type FileAccess = AccessMode;

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(1);

/// Directory entries inserted by a create that has not finished yet.
#[derive(Default)]
struct Staged {
    comp: Option<Ref>,
    header: Option<(Tag, Ref)>,
}

impl Staged {
    /// Undo every directory insert of a failed create.
    fn release(self, storage: &mut Storage) {
        let keys = [self.header, self.comp.map(|r| (DFTAG_COMPRESSED, r))];
        for (tag, reference) in keys.into_iter().flatten() {
            if let Err(err) = storage.dir.delete(tag, reference) {
                tracing::warn!(tag, reference, %err, "rollback could not delete directory entry");
            }
        }
    }
}

/// One open file holding plain and compressed elements.
///
/// # Lifecycle
/// [`create`](Self::create) turns a (tag, reference) into a compressed
/// element and returns a read-write handle. [`start_read`](Self::start_read)
/// and [`start_write`](Self::start_write) reopen it later. Every handle ends
/// with [`end_access`](Self::end_access), which commits buffered data.
/// [`close`](Self::close) ends whatever is still open and, for container
/// files, persists the directory.
///
/// Handles sharing an element share one [`ElementInfo`]; it is dropped with
/// the last handle.
pub struct CompFile {
    id: FileId,
    access: FileAccess,
    options: FileOptions,
    storage: Storage,
    handles: HandleArena,
    resident: HashMap<(Tag, Ref), Weak<RefCell<ElementInfo>>>,
    persist: bool,
    closed: bool,
}

impl CompFile {
    fn from_parts(storage: Storage, access: FileAccess, options: FileOptions, persist: bool) -> Self {
        let id = FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(file = %id, ?access, persist, "opened file");
        Self {
            id,
            access,
            options,
            storage,
            handles: HandleArena::new(options.max_handles),
            resident: HashMap::new(),
            persist,
            closed: false,
        }
    }

    pub fn with_storage(storage: Storage, access: FileAccess, options: FileOptions) -> Self {
        Self::from_parts(storage, access, options, false)
    }

    pub fn in_memory(access: FileAccess) -> Self {
        Self::with_storage(Storage::in_memory(), access, FileOptions::default())
    }

    /// Create (or truncate) a container file at `path`.
    pub fn create_container(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_container_with(path, FileOptions::default())
    }

    pub fn create_container_with(path: impl AsRef<Path>, options: FileOptions) -> Result<Self> {
        let mut store = FileStore::create(path)?;
        container::init(&mut store)?;
        let storage = Storage::new(Box::new(store), Box::new(MemDirectory::new()));
        Ok(Self::from_parts(storage, AccessMode::ReadWrite, options, true))
    }

    pub fn open_container(path: impl AsRef<Path>, access: FileAccess) -> Result<Self> {
        Self::open_container_with(path, access, FileOptions::default())
    }

    pub fn open_container_with(
        path: impl AsRef<Path>,
        access: FileAccess,
        options: FileOptions,
    ) -> Result<Self> {
        let mut store = FileStore::open(path, access.can_write())?;
        let dir = container::load_directory(&mut store)?;
        let storage = Storage::new(Box::new(store), Box::new(dir));
        Ok(Self::from_parts(storage, access, options, true))
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn access(&self) -> FileAccess {
        self.access
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Number of open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Whether metadata for the element at (`tag`, `reference`) is in memory.
    pub fn is_resident(&self, tag: Tag, reference: Ref) -> bool {
        self.resident
            .get(&(special_tag(base_tag(tag)), reference))
            .is_some_and(|w| w.strong_count() > 0)
    }

    /// Live references to the metadata of the element at (`tag`,
    /// `reference`); 0 when it is not resident.
    pub fn element_refs(&self, tag: Tag, reference: Ref) -> usize {
        self.resident
            .get(&(special_tag(base_tag(tag)), reference))
            .map_or(0, Weak::strong_count)
    }

    /// All directory entries, in key order.
    pub fn elements(&self) -> Vec<DirEntry> {
        self.storage.dir.entries()
    }

    fn require_writable(&self, what: &str) -> Result<()> {
        if self.access.can_write() {
            Ok(())
        } else {
            Err(HcompError::PermissionDenied(format!(
                "cannot {what}: {} is open read-only",
                self.id
            )))
        }
    }

    fn check_key(tag: Tag, reference: Ref) -> Result<()> {
        if tag == DFTAG_NULL || tag == DFTAG_COMPRESSED || is_special(tag) {
            return Err(HcompError::InvalidArgument(format!(
                "tag {tag} cannot name a plain element"
            )));
        }
        if reference == 0 {
            return Err(HcompError::InvalidArgument("reference 0 is reserved".to_string()));
        }
        Ok(())
    }

    /// Store `data` uncompressed at (`tag`, `reference`).
    pub fn put_plain(&mut self, tag: Tag, reference: Ref, data: &[u8]) -> Result<DirEntry> {
        Self::check_key(tag, reference)?;
        self.require_writable("store a plain element")?;
        if self.storage.dir.lookup(special_tag(tag), reference).is_some() {
            return Err(HcompError::AlreadySpecial { tag, reference });
        }
        let length = u32::try_from(data.len()).map_err(|_| {
            HcompError::Range(format!("plain element of {} bytes is too large", data.len()))
        })?;

        let offset = self.storage.store.allocate(data.len() as u64)?;
        self.storage.store.write_at(offset, data)?;
        let entry = DirEntry {
            tag,
            reference,
            offset,
            length,
        };
        self.storage.dir.insert(entry)?;
        Ok(entry)
    }

    pub fn get_plain(&mut self, tag: Tag, reference: Ref) -> Result<Vec<u8>> {
        let entry = self
            .storage
            .dir
            .lookup(tag, reference)
            .ok_or(HcompError::NotFound { tag, reference })?;
        self.storage.read_entry(&entry)
    }

    /// Make (`tag`, `reference`) a compressed element and open it for
    /// writing. An existing plain element at that key is compressed into
    /// it and removed.
    pub fn create(
        &mut self,
        tag: Tag,
        reference: Ref,
        model: ModelType,
        coder: CoderInfo,
    ) -> Result<Aid> {
        Self::check_key(tag, reference)?;
        self.require_writable("create a compressed element")?;
        if self.handles.is_full() {
            return Err(HcompError::ResourceExhausted(format!(
                "all {} access handles are in use",
                self.options.max_handles
            )));
        }
        let special = special_tag(tag);
        if self.storage.dir.lookup(special, reference).is_some() {
            return Err(HcompError::AlreadySpecial { tag, reference });
        }
        let model = Model::new(model)?;
        let coder = Coder::new(&coder)?;

        let mut staged = Staged::default();
        let record = match self.create_staged(&mut staged, tag, reference, model, coder) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(tag, reference, %err, "create failed, rolling back");
                staged.release(&mut self.storage);
                return Err(err);
            }
        };

        self.resident
            .insert(record.key(), Rc::downgrade(record.shared_info()));
        let aid = self.handles.insert(record)?;
        tracing::debug!(file = %self.id, tag, reference, %aid, coder = coder.coder_type().name(), "created compressed element");
        Ok(aid)
    }

    fn create_staged(
        &mut self,
        staged: &mut Staged,
        tag: Tag,
        reference: Ref,
        model: Model,
        coder: Coder,
    ) -> Result<AccessRecord> {
        let existing = self.storage.dir.lookup(tag, reference);

        let comp_ref = self.storage.dir.new_ref()?;
        self.storage.dir.insert(DirEntry {
            tag: DFTAG_COMPRESSED,
            reference: comp_ref,
            offset: 0,
            length: 0,
        })?;
        staged.comp = Some(comp_ref);

        let length = existing.map_or(COMP_START_BLOCK, |e| e.length);
        let header = CompHeader::new(length, comp_ref, model.model_type(), coder.info());
        let header_entry = format::write_header(&mut self.storage, special_tag(tag), reference, &header)?;
        staged.header = Some((header_entry.tag, header_entry.reference));

        let state = CoderState::new(coder, comp_ref, self.options.segment_size);
        let info = ElementInfo::new(length, comp_ref, model, state, header_entry).shared();
        let mut record = AccessRecord::new(self.id, header_entry, AccessMode::ReadWrite, info);
        record.start(&mut self.storage)?;

        if let Some(plain) = existing {
            let data = self.storage.read_entry(&plain)?;
            record.write(&mut self.storage, &data)?;
            record.flush(&mut self.storage)?;
            record.seek(0, Whence::Start)?;
            self.storage.dir.delete(plain.tag, plain.reference)?;
            tracing::debug!(tag, reference, len = data.len(), "compressed existing plain element");
        }
        Ok(record)
    }

    pub fn start_read(&mut self, tag: Tag, reference: Ref) -> Result<Aid> {
        self.open(tag, reference, AccessMode::Read)
    }

    pub fn start_write(&mut self, tag: Tag, reference: Ref) -> Result<Aid> {
        self.open(tag, reference, AccessMode::ReadWrite)
    }

    /// Open an existing compressed element.
    pub fn open(&mut self, tag: Tag, reference: Ref, mode: AccessMode) -> Result<Aid> {
        let tag = base_tag(tag);
        if tag == DFTAG_NULL {
            return Err(HcompError::InvalidArgument("tag 0 names no element".to_string()));
        }
        if mode.can_write() {
            self.require_writable("open an element for writing")?;
        }
        if self.handles.is_full() {
            return Err(HcompError::ResourceExhausted(format!(
                "all {} access handles are in use",
                self.options.max_handles
            )));
        }

        let special = special_tag(tag);
        let header_entry = match self.storage.dir.lookup(special, reference) {
            Some(entry) => entry,
            None if self.storage.dir.lookup(tag, reference).is_some() => {
                return Err(HcompError::NotCompressed { tag, reference });
            }
            None => return Err(HcompError::NotFound { tag, reference }),
        };

        let key = (special, reference);
        let info = match self.resident.get(&key).and_then(Weak::upgrade) {
            Some(info) => info,
            None => self.load_element(&header_entry)?.shared(),
        };
        let mut record = AccessRecord::new(self.id, header_entry, mode, Rc::clone(&info));
        record.start(&mut self.storage)?;

        self.resident.insert(key, Rc::downgrade(&info));
        let aid = self.handles.insert(record)?;
        tracing::debug!(file = %self.id, tag, reference, %aid, ?mode, "opened compressed element");
        Ok(aid)
    }

    fn load_element(&mut self, entry: &DirEntry) -> Result<ElementInfo> {
        let (tag, reference) = (entry.tag, entry.reference);
        let marker = format::peek_marker(&mut self.storage, entry)?;
        if marker != SPECIAL_COMP {
            return Err(HcompError::NotCompressed {
                tag: base_tag(tag),
                reference,
            });
        }
        let header = format::read_header(&mut self.storage, entry)?;

        let init_failed = |what: &'static str| {
            move |err: HcompError| HcompError::StrategyInit {
                what,
                tag,
                reference,
                source: Box::new(err),
            }
        };
        let model = Model::new(header.model).map_err(init_failed("model"))?;
        let coder = Coder::new(&header.coder).map_err(init_failed("coder"))?;

        let state = CoderState::new(coder, header.comp_ref, self.options.segment_size);
        Ok(ElementInfo::new(header.length, header.comp_ref, model, state, *entry))
    }

    /// Move the handle's cursor; returns the new position.
    pub fn seek(&mut self, aid: Aid, offset: i32, whence: Whence) -> Result<u32> {
        self.handles.get_mut(aid)?.seek(offset, whence)
    }

    /// Read `len` bytes at the cursor; 0 reads through the end.
    pub fn read(&mut self, aid: Aid, len: u32) -> Result<Vec<u8>> {
        self.handles.get_mut(aid)?.read(&mut self.storage, len)
    }

    pub fn write(&mut self, aid: Aid, data: &[u8]) -> Result<usize> {
        self.handles.get_mut(aid)?.write(&mut self.storage, data)
    }

    /// Commit the element's buffered bytes without ending access.
    pub fn flush(&mut self, aid: Aid) -> Result<()> {
        self.handles.get_mut(aid)?.flush(&mut self.storage)
    }

    pub fn inquire(&self, aid: Aid) -> Result<Inquiry> {
        Ok(self.handles.get(aid)?.inquire())
    }

    /// Coder and model of the element behind `aid`.
    pub fn info(&self, aid: Aid) -> Result<SpecialInfo> {
        Ok(self.handles.get(aid)?.info(&self.storage))
    }

    /// Finish the handle. Its slot is released even when committing fails.
    pub fn end_access(&mut self, aid: Aid) -> Result<()> {
        let mut record = self.handles.remove(aid)?;
        let key = record.key();
        let result = record.end_access(&mut self.storage);
        drop(record);

        if self.resident.get(&key).is_some_and(|w| w.strong_count() == 0) {
            self.resident.remove(&key);
            tracing::debug!(file = %self.id, tag = key.0, reference = key.1, "released element metadata");
        }
        result
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut first_err = None;
        for aid in self.handles.aids() {
            if let Err(err) = self.end_access(aid) {
                first_err.get_or_insert(err);
            }
        }
        if self.persist && self.access.can_write() {
            if let Err(err) =
                container::save_directory(self.storage.store.as_mut(), self.storage.dir.as_ref())
            {
                first_err.get_or_insert(err);
            }
        }
        self.closed = true;
        tracing::debug!(file = %self.id, "closed file");
        first_err.map_or(Ok(()), Err)
    }

    /// End every open handle and persist the directory of a writable
    /// container.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for CompFile {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.shutdown() {
                tracing::warn!(file = %self.id, %err, "implicit close failed");
            }
        }
    }
}
