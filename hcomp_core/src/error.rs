//! The single error type for the compressed-element engine.

use hcomp_codecs::CodecError;
use thiserror::Error;

use crate::tag::{Ref, Tag};

/// Coarse classification of every [`HcompError`], for callers that only
/// need to know which contract was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    PermissionDenied,
    AlreadySpecial,
    ResourceExhausted,
    StorageIo,
    DirectoryIo,
    Range,
    StrategyInit,
}

#[derive(Error, Debug)]
pub enum HcompError {
    // ---- caller mistakes ----
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown coder type {0}")]
    UnknownCoder(u16),

    #[error("unknown model type {0}")]
    UnknownModel(u16),

    #[error("invalid coder parameters: {0}")]
    BadCoderParams(#[source] CodecError),

    #[error("access handle {0} is not open")]
    BadAid(String),

    #[error("element {tag}/{reference} is not a compressed element")]
    NotCompressed { tag: Tag, reference: Ref },

    #[error("{0}")]
    PermissionDenied(String),

    #[error("element {tag}/{reference} is already a special element")]
    AlreadySpecial { tag: Tag, reference: Ref },

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    Range(String),

    #[error("failed to initialise {what} from header of {tag}/{reference}: {source}")]
    StrategyInit {
        what: &'static str,
        tag: Tag,
        reference: Ref,
        #[source]
        source: Box<HcompError>,
    },

    // ---- collaborators ----
    #[error("block store {op} failed: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt compressed data: {0}")]
    Corrupt(#[from] CodecError),

    #[error("malformed header: {0}")]
    BadHeader(String),

    #[error("no element {tag}/{reference}")]
    NotFound { tag: Tag, reference: Ref },

    #[error("directory {op} failed for {tag}/{reference}: {reason}")]
    Directory {
        op: &'static str,
        tag: Tag,
        reference: Ref,
        reason: String,
    },
}

impl HcompError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HcompError::InvalidArgument(_)
            | HcompError::UnknownCoder(_)
            | HcompError::UnknownModel(_)
            | HcompError::BadCoderParams(_)
            | HcompError::BadAid(_)
            | HcompError::BadHeader(_)
            | HcompError::NotCompressed { .. } => ErrorKind::InvalidArgument,
            HcompError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            HcompError::AlreadySpecial { .. } => ErrorKind::AlreadySpecial,
            HcompError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            HcompError::Range(_) => ErrorKind::Range,
            HcompError::StrategyInit { .. } => ErrorKind::StrategyInit,
            HcompError::Storage { .. } | HcompError::Corrupt(_) => ErrorKind::StorageIo,
            HcompError::NotFound { .. } | HcompError::Directory { .. } => ErrorKind::DirectoryIo,
        }
    }

    pub(crate) fn storage(op: &'static str) -> impl FnOnce(std::io::Error) -> HcompError {
        move |source| HcompError::Storage { op, source }
    }
}

pub type Result<T> = std::result::Result<T, HcompError>;
