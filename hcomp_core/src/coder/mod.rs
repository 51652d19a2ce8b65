//! Coder strategy: the closed set of encoders and the per-element stream
//! state that drives them over a segment chain.

pub mod chain;

use std::borrow::Cow;

use hcomp_codecs::{rle, CodecError, NBit, NBitParams, SkipHuffman};
use serde::Serialize;

use crate::error::{HcompError, Result};
use crate::storage::Storage;
use crate::tag::Ref;

pub use chain::{Segment, SegmentChain, SEGMENT_HEADER_SIZE};

/// Coder tag stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum CoderType {
    None = 0,
    Rle = 1,
    NBit = 2,
    #[serde(rename = "skphuff")]
    SkipHuff = 3,
}

impl CoderType {
    pub fn name(self) -> &'static str {
        match self {
            CoderType::None => "none",
            CoderType::Rle => "rle",
            CoderType::NBit => "nbit",
            CoderType::SkipHuff => "skphuff",
        }
    }
}

impl TryFrom<u16> for CoderType {
    type Error = HcompError;

    fn try_from(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(CoderType::None),
            1 => Ok(CoderType::Rle),
            2 => Ok(CoderType::NBit),
            3 => Ok(CoderType::SkipHuff),
            other => Err(HcompError::UnknownCoder(other)),
        }
    }
}

/// Skipping-Huffman parameters. `comp_size` is carried through the header
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipHuffInfo {
    pub skip_size: u32,
    pub comp_size: u32,
}

/// Caller-supplied coder selection, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderInfo {
    None,
    Rle,
    NBit(NBitParams),
    SkipHuff(SkipHuffInfo),
}

impl CoderInfo {
    pub fn coder_type(&self) -> CoderType {
        match self {
            CoderInfo::None => CoderType::None,
            CoderInfo::Rle => CoderType::Rle,
            CoderInfo::NBit(_) => CoderType::NBit,
            CoderInfo::SkipHuff(_) => CoderType::SkipHuff,
        }
    }

    pub fn skip_huffman(skip_size: u32) -> Self {
        CoderInfo::SkipHuff(SkipHuffInfo {
            skip_size,
            comp_size: 0,
        })
    }
}

/// A validated coder. Every variant encodes one complete run of raw bytes
/// into an independent encoded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coder {
    None,
    Rle,
    NBit(NBit),
    SkipHuff { kernel: SkipHuffman, comp_size: u32 },
}

impl Coder {
    pub fn new(info: &CoderInfo) -> Result<Self> {
        Ok(match *info {
            CoderInfo::None => Coder::None,
            CoderInfo::Rle => Coder::Rle,
            CoderInfo::NBit(params) => {
                Coder::NBit(NBit::new(params).map_err(HcompError::BadCoderParams)?)
            }
            CoderInfo::SkipHuff(SkipHuffInfo { skip_size, comp_size }) => Coder::SkipHuff {
                kernel: SkipHuffman::new(skip_size).map_err(HcompError::BadCoderParams)?,
                comp_size,
            },
        })
    }

    pub fn coder_type(&self) -> CoderType {
        self.info().coder_type()
    }

    /// Parameters as they are written to the header.
    pub fn info(&self) -> CoderInfo {
        match *self {
            Coder::None => CoderInfo::None,
            Coder::Rle => CoderInfo::Rle,
            Coder::NBit(nbit) => CoderInfo::NBit(nbit.params()),
            Coder::SkipHuff { kernel, comp_size } => CoderInfo::SkipHuff(SkipHuffInfo {
                skip_size: kernel.skip_size(),
                comp_size,
            }),
        }
    }

    /// Raw bytes per coding unit. Segments that end off a unit boundary are
    /// re-encoded when more data is appended.
    pub fn unit(&self) -> usize {
        match self {
            Coder::None | Coder::Rle => 1,
            Coder::NBit(nbit) => nbit.nt_size(),
            Coder::SkipHuff { kernel, .. } => kernel.skip_size() as usize,
        }
    }

    /// Whether decoding can differ from the raw bytes that were encoded.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Coder::NBit(_))
    }

    pub fn encode(&self, raw: &[u8]) -> Vec<u8> {
        match self {
            Coder::None => raw.to_vec(),
            Coder::Rle => rle::encode(raw),
            Coder::NBit(nbit) => nbit.encode(raw),
            Coder::SkipHuff { kernel, .. } => kernel.encode(raw),
        }
    }

    pub fn decode(&self, encoded: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let raw = match self {
            Coder::None => {
                if encoded.len() != raw_len {
                    return Err(HcompError::Corrupt(CodecError::Truncated {
                        codec: "none",
                        produced: encoded.len(),
                        expected: raw_len,
                    }));
                }
                encoded.to_vec()
            }
            Coder::Rle => rle::decode(encoded, raw_len)?,
            Coder::NBit(nbit) => nbit.decode(encoded, raw_len)?,
            Coder::SkipHuff { kernel, .. } => kernel.decode(encoded, raw_len)?,
        };
        Ok(raw)
    }
}

/// Snapshot of a coder's stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoderStatus {
    pub coder: CoderType,
    /// Committed segments.
    pub segments: usize,
    /// Raw bytes held by segments plus pending bytes.
    pub coded_len: u64,
    /// Raw bytes buffered but not yet encoded.
    pub pending: usize,
    /// Bytes of block storage used by committed segments.
    pub encoded_len: u64,
}

/// Coder-layer state machine of one element.
#[derive(Debug)]
pub struct CoderState {
    coder: Coder,
    comp_ref: Ref,
    segment_size: usize,
    chain: Option<SegmentChain>,
    pending: Vec<u8>,
    /// Most recently decoded segment, by index.
    cache: Option<(usize, Vec<u8>)>,
}

fn not_open(comp_ref: Ref) -> HcompError {
    HcompError::InvalidArgument(format!("coder of compressed data {comp_ref} is not open"))
}

impl CoderState {
    pub fn new(coder: Coder, comp_ref: Ref, segment_size: usize) -> Self {
        let unit = coder.unit();
        let segment_size = (segment_size.clamp(1, u32::MAX as usize) / unit).max(1) * unit;
        Self {
            coder,
            comp_ref,
            segment_size,
            chain: None,
            pending: Vec::new(),
            cache: None,
        }
    }

    pub fn coder(&self) -> &Coder {
        &self.coder
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn stread(&mut self, storage: &mut Storage) -> Result<()> {
        self.load(storage)
    }

    pub fn stwrite(&mut self, storage: &mut Storage) -> Result<()> {
        self.load(storage)
    }

    fn load(&mut self, storage: &mut Storage) -> Result<()> {
        if self.chain.is_none() {
            self.chain = Some(SegmentChain::load(storage, self.comp_ref)?);
        }
        Ok(())
    }

    fn chain(&self) -> Result<&SegmentChain> {
        self.chain.as_ref().ok_or_else(|| not_open(self.comp_ref))
    }

    /// Raw bytes the coder holds, committed or pending.
    pub fn coded_len(&self) -> Result<u64> {
        Ok(self.chain()?.raw_len() + self.pending.len() as u64)
    }

    /// Any position is a valid restart point; decoding resumes at the
    /// segment holding it on the next read.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let chain = self.chain()?;
        if let Some(idx) = chain.locate(pos) {
            tracing::trace!(comp_ref = self.comp_ref, pos, segment = idx, "seek");
        }
        Ok(())
    }

    pub fn read(&mut self, storage: &mut Storage, pos: u64, len: usize) -> Result<Vec<u8>> {
        let end = pos + len as u64;
        let committed = self.chain()?.raw_len();
        let mut out = Vec::with_capacity(len);
        let mut cursor = pos;

        while cursor < end && cursor < committed {
            let chain = self.chain()?;
            let Some((idx, segment)) = chain
                .locate(cursor)
                .and_then(|idx| chain.segment(idx).map(|s| (idx, *s)))
            else {
                break;
            };
            let decoded = self.decoded(storage, idx)?;
            let from = (cursor - segment.raw_start) as usize;
            let to = ((end - segment.raw_start) as usize).min(decoded.len());
            out.extend_from_slice(&decoded[from..to]);
            cursor += (to - from) as u64;
        }

        if cursor < end && cursor >= committed {
            let from = (cursor - committed) as usize;
            if from < self.pending.len() {
                let to = ((end - committed) as usize).min(self.pending.len());
                let pending = self.pending_view()?;
                out.extend_from_slice(&pending[from..to]);
            }
        }

        // past the coded data the element reads as zeros
        out.resize(len, 0);
        Ok(out)
    }

    /// Pending bytes as they will read once committed.
    fn pending_view(&self) -> Result<Cow<'_, [u8]>> {
        if !self.coder.is_lossy() {
            return Ok(Cow::Borrowed(&self.pending));
        }
        let encoded = self.coder.encode(&self.pending);
        Ok(Cow::Owned(self.coder.decode(&encoded, self.pending.len())?))
    }

    fn decoded(&mut self, storage: &mut Storage, idx: usize) -> Result<&[u8]> {
        let cached = matches!(&self.cache, Some((hit, _)) if *hit == idx);
        if !cached {
            let chain = self.chain()?;
            let raw_len = chain.segment(idx).map_or(0, |s| s.raw_len as usize);
            let encoded = chain.read_payload(storage, idx)?;
            let raw = self.coder.decode(&encoded, raw_len)?;
            tracing::trace!(comp_ref = self.comp_ref, segment = idx, raw_len, "decoded segment");
            self.cache = Some((idx, raw));
        }
        Ok(self.cache.as_ref().map(|(_, raw)| raw.as_slice()).unwrap_or_default())
    }

    /// Append `data` at `pos`, which must not lie inside already coded data.
    pub fn write(&mut self, storage: &mut Storage, pos: u64, data: &[u8]) -> Result<usize> {
        let coded = self.coded_len()?;
        if pos < coded {
            return Err(HcompError::Range(format!(
                "write at {pos} falls inside {coded} already coded bytes; only appends are supported"
            )));
        }
        if self.pending.is_empty() {
            self.reopen_tail(storage)?;
        }

        let kept = self.pending.len();
        let segments = self.chain()?.len();
        let gap = (pos - coded) as usize;
        self.pending.resize(kept + gap, 0);
        self.pending.extend_from_slice(data);

        let mut done = 0;
        while self.pending.len() - done >= self.segment_size {
            if let Err(err) = self.commit_segment(storage, done, self.segment_size) {
                self.abandon_write(storage, segments, kept);
                return Err(err);
            }
            done += self.segment_size;
        }
        self.pending.drain(..done);
        Ok(data.len())
    }

    /// Undo a partly committed write: unlink the segments it stored and
    /// drop its bytes from the pending buffer.
    fn abandon_write(&mut self, storage: &mut Storage, segments: usize, kept: usize) {
        if let Some(chain) = self.chain.as_mut() {
            while chain.len() > segments {
                if let Err(err) = chain.pop(storage) {
                    tracing::warn!(comp_ref = self.comp_ref, %err, "could not unlink segment of failed write");
                    break;
                }
            }
        }
        self.pending.truncate(kept);
        self.cache = None;
    }

    /// Pull a tail segment that ends off a coding-unit boundary back into
    /// the pending buffer.
    fn reopen_tail(&mut self, storage: &mut Storage) -> Result<()> {
        let unit = self.coder.unit();
        let chain = self.chain()?;
        let Some(last) = chain.last().copied() else {
            return Ok(());
        };
        if unit == 1 || last.raw_len as usize % unit == 0 {
            return Ok(());
        }

        let idx = chain.len() - 1;
        let raw = self.decoded(storage, idx)?.to_vec();
        if let Some(chain) = self.chain.as_mut() {
            chain.pop(storage)?;
        }
        self.cache = None;
        self.pending = raw;
        tracing::trace!(comp_ref = self.comp_ref, raw_len = last.raw_len, "reopened tail segment");
        Ok(())
    }

    /// Encode and store `pending[start..start + len]` as one segment.
    fn commit_segment(&mut self, storage: &mut Storage, start: usize, len: usize) -> Result<()> {
        let encoded = self.coder.encode(&self.pending[start..start + len]);
        let chain = self.chain.as_mut().ok_or_else(|| not_open(self.comp_ref))?;
        chain.append(storage, len as u32, &encoded)?;
        tracing::trace!(
            comp_ref = self.comp_ref,
            segment = chain.len() - 1,
            raw_len = len,
            enc_len = encoded.len(),
            "committed segment"
        );
        Ok(())
    }

    /// Encode and store everything still pending.
    pub fn commit(&mut self, storage: &mut Storage) -> Result<()> {
        while !self.pending.is_empty() {
            let len = self.pending.len().min(self.segment_size);
            self.commit_segment(storage, 0, len)?;
            self.pending.drain(..len);
        }
        Ok(())
    }

    pub fn end_access(&mut self, storage: &mut Storage) -> Result<()> {
        self.commit(storage)
    }

    pub fn inquire(&self) -> CoderStatus {
        let (segments, raw_len, encoded_len) = self
            .chain
            .as_ref()
            .map_or((0, 0, 0), |c| (c.len(), c.raw_len(), c.encoded_len()));
        CoderStatus {
            coder: self.coder.coder_type(),
            segments,
            coded_len: raw_len + self.pending.len() as u64,
            pending: self.pending.len(),
            encoded_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::DirEntry;
    use crate::tag::DFTAG_COMPRESSED;
    use hcomp_codecs::numtype::{DFNT_INT16, DFNT_INT32, DFNT_UINT16};

    fn open_state(coder: CoderInfo, segment_size: usize) -> (Storage, CoderState) {
        let mut storage = Storage::in_memory();
        storage.store.allocate(16).unwrap();
        storage
            .dir
            .insert(DirEntry {
                tag: DFTAG_COMPRESSED,
                reference: 2,
                offset: 0,
                length: 0,
            })
            .unwrap();
        let mut state = CoderState::new(Coder::new(&coder).unwrap(), 2, segment_size);
        state.stwrite(&mut storage).unwrap();
        (storage, state)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i / 7) % 251) as u8).collect()
    }

    #[test]
    fn coder_tags_round_trip() {
        for tag in 0..4u16 {
            assert_eq!(CoderType::try_from(tag).unwrap() as u16, tag);
        }
        assert!(matches!(CoderType::try_from(4), Err(HcompError::UnknownCoder(4))));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let bad_nt = CoderInfo::NBit(NBitParams {
            nt: 999,
            sign_ext: false,
            fill_one: false,
            start_bit: 3,
            bit_len: 4,
        });
        assert_eq!(Coder::new(&bad_nt).unwrap_err().kind(), ErrorKind::InvalidArgument);
        let bad_skip = CoderInfo::skip_huffman(0);
        assert_eq!(Coder::new(&bad_skip).unwrap_err().kind(), ErrorKind::InvalidArgument);
        let too_wide = CoderInfo::skip_huffman(65);
        assert!(Coder::new(&too_wide).is_err());
    }

    #[test]
    fn info_survives_validation() {
        let info = CoderInfo::SkipHuff(SkipHuffInfo {
            skip_size: 4,
            comp_size: 77,
        });
        assert_eq!(Coder::new(&info).unwrap().info(), info);
    }

    #[test]
    fn segment_size_is_a_multiple_of_the_unit() {
        let coder = Coder::new(&CoderInfo::skip_huffman(3)).unwrap();
        assert_eq!(CoderState::new(coder, 1, 100).segment_size(), 99);
        let coder = Coder::new(&CoderInfo::None).unwrap();
        assert_eq!(CoderState::new(coder, 1, 0).segment_size(), 1);
    }

    #[test]
    fn writes_commit_full_segments_and_read_back() {
        let data = sample(1000);
        for info in [CoderInfo::None, CoderInfo::Rle, CoderInfo::skip_huffman(2)] {
            let (mut storage, mut state) = open_state(info, 256);
            state.write(&mut storage, 0, &data[..600]).unwrap();
            state.write(&mut storage, 600, &data[600..]).unwrap();

            let status = state.inquire();
            assert_eq!(status.segments, 3);
            assert_eq!(status.pending, 1000 - 768);
            assert_eq!(status.coded_len, 1000);

            assert_eq!(state.read(&mut storage, 0, 1000).unwrap(), data);
            assert_eq!(state.read(&mut storage, 250, 20).unwrap(), &data[250..270]);
            assert_eq!(state.read(&mut storage, 760, 20).unwrap(), &data[760..780]);
        }
    }

    #[test]
    fn committed_data_reloads_from_storage() {
        let data = sample(700);
        let (mut storage, mut state) = open_state(CoderInfo::Rle, 256);
        state.write(&mut storage, 0, &data).unwrap();
        state.end_access(&mut storage).unwrap();
        assert_eq!(state.inquire().pending, 0);

        let mut fresh = CoderState::new(Coder::Rle, 2, 256);
        fresh.stread(&mut storage).unwrap();
        assert_eq!(fresh.inquire().segments, 3);
        assert_eq!(fresh.read(&mut storage, 0, 700).unwrap(), data);
    }

    #[test]
    fn reads_past_coded_data_are_zero() {
        let (mut storage, mut state) = open_state(CoderInfo::None, 64);
        state.write(&mut storage, 0, b"abc").unwrap();
        assert_eq!(state.read(&mut storage, 1, 5).unwrap(), b"bc\0\0\0");
        assert_eq!(state.read(&mut storage, 10, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn gaps_are_zero_filled_and_rewrites_rejected() {
        let (mut storage, mut state) = open_state(CoderInfo::Rle, 64);
        state.write(&mut storage, 0, b"ab").unwrap();
        state.write(&mut storage, 4, b"cd").unwrap();
        assert_eq!(state.read(&mut storage, 0, 6).unwrap(), b"ab\0\0cd");

        let err = state.write(&mut storage, 3, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[test]
    fn unaligned_tail_is_reencoded_on_append() {
        let params = NBitParams {
            nt: DFNT_UINT16,
            sign_ext: false,
            fill_one: false,
            start_bit: 15,
            bit_len: 16,
        };
        let (mut storage, mut state) = open_state(CoderInfo::NBit(params), 64);
        state.write(&mut storage, 0, &[1, 2, 3]).unwrap();
        state.commit(&mut storage).unwrap();
        assert_eq!(state.inquire().segments, 1);

        state.write(&mut storage, 3, &[4, 5, 6]).unwrap();
        state.commit(&mut storage).unwrap();
        let status = state.inquire();
        assert_eq!(status.segments, 1);
        assert_eq!(state.read(&mut storage, 0, 6).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn nbit_packs_the_field_only() {
        let params = NBitParams {
            nt: DFNT_INT32,
            sign_ext: false,
            fill_one: false,
            start_bit: 7,
            bit_len: 8,
        };
        let (mut storage, mut state) = open_state(CoderInfo::NBit(params), 4096);
        let raw: Vec<u8> = (0..256u32).flat_map(|v| v.to_be_bytes()).collect();
        state.write(&mut storage, 0, &raw).unwrap();
        state.commit(&mut storage).unwrap();
        assert_eq!(state.inquire().encoded_len, SEGMENT_HEADER_SIZE + 256);
        assert_eq!(state.read(&mut storage, 0, raw.len()).unwrap(), raw);
    }

    #[test]
    fn buffered_nbit_reads_match_committed_reads() {
        let params = NBitParams {
            nt: DFNT_INT16,
            sign_ext: false,
            fill_one: false,
            start_bit: 7,
            bit_len: 8,
        };
        let (mut storage, mut state) = open_state(CoderInfo::NBit(params), 64);
        state.write(&mut storage, 0, &[0x12, 0x34, 0x56, 0x78]).unwrap();
        let buffered = state.read(&mut storage, 0, 4).unwrap();
        assert_eq!(buffered, vec![0x00, 0x34, 0x00, 0x78]);

        state.commit(&mut storage).unwrap();
        assert_eq!(state.inquire().pending, 0);
        assert_eq!(state.read(&mut storage, 0, 4).unwrap(), buffered);
    }

    #[test]
    fn unopened_state_refuses_io() {
        let mut storage = Storage::in_memory();
        let mut state = CoderState::new(Coder::None, 5, 64);
        assert!(state.read(&mut storage, 0, 1).is_err());
        assert!(state.write(&mut storage, 0, b"x").is_err());
    }
}
