//! Compression header stored as the payload of a compressed element's
//! directory entry.
//!
//! ```text
//! offset  size  field
//!      0     2  special marker (SPECIAL_COMP)
//!      2     2  header version
//!      4     4  logical length, signed
//!      8     2  compressed-data reference
//!     10     2  model type
//!     12     2  coder type
//!     14     *  coder parameters: 0 (none, rle), 16 (nbit), 8 (skphuff)
//! ```
//! All fields are big-endian.

use hcomp_codecs::NBitParams;

use crate::coder::{CoderInfo, CoderType, SkipHuffInfo};
use crate::error::{HcompError, Result};
use crate::model::ModelType;
use crate::storage::{DirEntry, Storage};
use crate::tag::{Ref, Tag, SPECIAL_COMP};

pub const COMP_HEADER_VERSION: u16 = 0;

/// Length of the fixed header prefix.
pub const COMP_HEADER_LENGTH: usize = 14;

/// Logical length given to a freshly created, still empty element.
pub const COMP_START_BLOCK: u32 = 1;

/// Offset of the logical-length field, patched in place after appends.
pub const LENGTH_FIELD_OFFSET: u64 = 4;

pub const NBIT_SUFFIX_LEN: usize = 16;
pub const SKPHUFF_SUFFIX_LEN: usize = 8;

/// Bytes of coder parameters following the fixed prefix.
pub fn suffix_len(coder: CoderType) -> usize {
    match coder {
        CoderType::None | CoderType::Rle => 0,
        CoderType::NBit => NBIT_SUFFIX_LEN,
        CoderType::SkipHuff => SKPHUFF_SUFFIX_LEN,
    }
}

/// Decoded fixed prefix; tells the reader how long the suffix is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrefix {
    pub version: u16,
    pub length: u32,
    pub comp_ref: Ref,
    pub model: ModelType,
    pub coder: CoderType,
}

impl HeaderPrefix {
    pub fn suffix_len(&self) -> usize {
        suffix_len(self.coder)
    }
}

/// Full compression header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompHeader {
    pub version: u16,
    /// Logical (uncompressed) length in bytes.
    pub length: u32,
    /// Reference of the element holding the encoded bytes.
    pub comp_ref: Ref,
    pub model: ModelType,
    pub coder: CoderInfo,
}

fn be_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

fn be_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn be_i32(buf: &[u8]) -> i32 {
    i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Encode a logical length for the signed on-disk field.
pub fn encode_length(length: u32) -> Result<[u8; 4]> {
    let signed = i32::try_from(length).map_err(|_| {
        HcompError::Range(format!("logical length {length} does not fit the header"))
    })?;
    Ok(signed.to_be_bytes())
}

impl CompHeader {
    pub fn new(length: u32, comp_ref: Ref, model: ModelType, coder: CoderInfo) -> Self {
        Self {
            version: COMP_HEADER_VERSION,
            length,
            comp_ref,
            model,
            coder,
        }
    }

    /// Serialized size: prefix plus coder suffix.
    pub fn encoded_len(&self) -> usize {
        COMP_HEADER_LENGTH + suffix_len(self.coder.coder_type())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&SPECIAL_COMP.to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&encode_length(self.length)?);
        buf.extend_from_slice(&self.comp_ref.to_be_bytes());
        buf.extend_from_slice(&(self.model as u16).to_be_bytes());
        buf.extend_from_slice(&(self.coder.coder_type() as u16).to_be_bytes());

        match self.coder {
            CoderInfo::None | CoderInfo::Rle => {}
            CoderInfo::NBit(nbit) => {
                buf.extend_from_slice(&nbit.nt.to_be_bytes());
                buf.extend_from_slice(&(nbit.sign_ext as u16).to_be_bytes());
                buf.extend_from_slice(&(nbit.fill_one as u16).to_be_bytes());
                buf.extend_from_slice(&nbit.start_bit.to_be_bytes());
                buf.extend_from_slice(&nbit.bit_len.to_be_bytes());
            }
            CoderInfo::SkipHuff(skphuff) => {
                buf.extend_from_slice(&skphuff.skip_size.to_be_bytes());
                buf.extend_from_slice(&skphuff.comp_size.to_be_bytes());
            }
        }
        debug_assert_eq!(buf.len(), self.encoded_len());
        Ok(buf)
    }

    /// Decode the fixed prefix, validating marker, version, length and tags.
    pub fn parse_prefix(buf: &[u8; COMP_HEADER_LENGTH]) -> Result<HeaderPrefix> {
        let marker = be_u16(&buf[0..2]) as i16;
        if marker != SPECIAL_COMP {
            return Err(HcompError::BadHeader(format!(
                "special marker {marker} is not a compression header"
            )));
        }
        let version = be_u16(&buf[2..4]);
        if version > COMP_HEADER_VERSION {
            return Err(HcompError::BadHeader(format!(
                "unsupported header version {version}"
            )));
        }
        let length = be_i32(&buf[4..8]);
        let length = u32::try_from(length)
            .map_err(|_| HcompError::BadHeader(format!("negative logical length {length}")))?;

        Ok(HeaderPrefix {
            version,
            length,
            comp_ref: be_u16(&buf[8..10]),
            model: ModelType::try_from(be_u16(&buf[10..12]))?,
            coder: CoderType::try_from(be_u16(&buf[12..14]))?,
        })
    }

    /// Combine a parsed prefix with exactly `prefix.suffix_len()` suffix bytes.
    pub fn from_parts(prefix: HeaderPrefix, suffix: &[u8]) -> Result<Self> {
        if suffix.len() != prefix.suffix_len() {
            return Err(HcompError::BadHeader(format!(
                "{} coder expects {} parameter bytes, got {}",
                prefix.coder.name(),
                prefix.suffix_len(),
                suffix.len()
            )));
        }

        let coder = match prefix.coder {
            CoderType::None => CoderInfo::None,
            CoderType::Rle => CoderInfo::Rle,
            CoderType::NBit => CoderInfo::NBit(NBitParams {
                nt: be_i32(&suffix[0..4]),
                sign_ext: be_u16(&suffix[4..6]) != 0,
                fill_one: be_u16(&suffix[6..8]) != 0,
                start_bit: be_i32(&suffix[8..12]),
                bit_len: be_i32(&suffix[12..16]),
            }),
            CoderType::SkipHuff => CoderInfo::SkipHuff(SkipHuffInfo {
                skip_size: be_u32(&suffix[0..4]),
                comp_size: be_u32(&suffix[4..8]),
            }),
        };

        Ok(Self {
            version: prefix.version,
            length: prefix.length,
            comp_ref: prefix.comp_ref,
            model: prefix.model,
            coder,
        })
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let prefix: &[u8; COMP_HEADER_LENGTH] = buf
            .get(..COMP_HEADER_LENGTH)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| {
                HcompError::BadHeader(format!("header of {} bytes is too short", buf.len()))
            })?;
        let prefix = Self::parse_prefix(prefix)?;
        Self::from_parts(prefix, &buf[COMP_HEADER_LENGTH..])
    }
}

/// Allocate a block for `header`, write it, and register it under
/// (`tag`, `reference`).
pub fn write_header(
    storage: &mut Storage,
    tag: Tag,
    reference: Ref,
    header: &CompHeader,
) -> Result<DirEntry> {
    let bytes = header.to_bytes()?;
    let offset = storage.store.allocate(bytes.len() as u64)?;
    storage.store.write_at(offset, &bytes)?;

    let entry = DirEntry {
        tag,
        reference,
        offset,
        length: bytes.len() as u32,
    };
    storage.dir.insert(entry)?;
    tracing::trace!(tag, reference, offset, len = bytes.len(), "wrote compression header");
    Ok(entry)
}

/// Read the prefix, then exactly the suffix its coder type calls for.
pub fn read_header(storage: &mut Storage, entry: &DirEntry) -> Result<CompHeader> {
    let mut prefix = [0u8; COMP_HEADER_LENGTH];
    storage.store.read_at(entry.offset, &mut prefix)?;
    let prefix = CompHeader::parse_prefix(&prefix)?;

    let mut suffix = vec![0u8; prefix.suffix_len()];
    storage.store.read(&mut suffix)?;
    CompHeader::from_parts(prefix, &suffix)
}

/// Rewrite the 4-byte logical-length field of an existing header.
pub fn patch_length(storage: &mut Storage, entry: &DirEntry, length: u32) -> Result<()> {
    let bytes = encode_length(length)?;
    storage
        .store
        .write_at(entry.offset + LENGTH_FIELD_OFFSET, &bytes)?;
    tracing::trace!(tag = entry.tag, reference = entry.reference, length, "patched header length");
    Ok(())
}

/// Special-element marker at the start of a special entry's payload.
pub fn peek_marker(storage: &mut Storage, entry: &DirEntry) -> Result<i16> {
    let mut marker = [0u8; 2];
    storage.store.read_at(entry.offset, &mut marker)?;
    Ok(i16::from_be_bytes(marker))
}
