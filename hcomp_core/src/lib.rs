//! Compressed special elements over a tagged block store.
//!
//! A compressed element lives under the special form of its tag: a small
//! header names the model and coder, and a chain of independently encoded
//! segments under [`DFTAG_COMPRESSED`] holds the data. [`CompFile`] owns the
//! lifecycle; everything else is reached through the [`Aid`] handles it
//! hands out.

pub mod access;
pub mod coder;
pub mod config;
pub mod element;
pub mod error;
pub mod file;
pub mod format;
pub mod model;
pub mod storage;
pub mod tag;

pub use access::{AccessMode, Aid, FileId, Inquiry, SpecialInfo, Whence};
pub use coder::{Coder, CoderInfo, CoderStatus, CoderType, SkipHuffInfo};
pub use config::{FileOptions, DEFAULT_SEGMENT_SIZE, MAX_ACCESS_RECORDS};
pub use error::{ErrorKind, HcompError, Result};
pub use file::{CompFile, FileAccess};
pub use format::CompHeader;
pub use hcomp_codecs::numtype;
pub use hcomp_codecs::NBitParams;
pub use model::ModelType;
pub use storage::{BlockStore, DirEntry, DirectoryIndex, MemDirectory, MemStore, Storage};
pub use tag::{special_tag, Ref, Tag, DFTAG_COMPRESSED};
