//! Skipping Huffman coding with adaptive splay-tree prefix codes.
//!
//! Byte `i` of a run is coded with tree `i % skip_size`, so interleaved
//! fields (for example the high and low bytes of 16-bit samples) each get a
//! code adapted to their own distribution. Every tree starts balanced and is
//! semi-splayed toward each symbol after it is coded; encoder and decoder
//! perform identical updates.

use crate::bitio::{BitReader, BitWriter};
use crate::error::{CodecError, Result};

/// Largest supported skipping unit.
pub const MAX_SKIP_SIZE: u32 = 64;

const SYMBOLS: usize = 256;
const INTERNAL: usize = SYMBOLS - 1;
const NODES: usize = INTERNAL + SYMBOLS;
const ROOT: usize = 0;
const LEAF_BASE: usize = INTERNAL;

#[derive(Clone)]
struct SplayTree {
    left: [u16; INTERNAL],
    right: [u16; INTERNAL],
    up: [u16; NODES],
}

impl SplayTree {
    fn new() -> Self {
        let mut tree = Self {
            left: [0; INTERNAL],
            right: [0; INTERNAL],
            up: [0; NODES],
        };
        for node in 1..NODES {
            tree.up[node] = ((node - 1) / 2) as u16;
        }
        for node in 0..INTERNAL {
            tree.left[node] = (2 * node + 1) as u16;
            tree.right[node] = (2 * node + 2) as u16;
        }
        tree
    }

    fn encode(&mut self, symbol: u8, writer: &mut BitWriter, path: &mut Vec<bool>) {
        path.clear();
        let mut node = LEAF_BASE + symbol as usize;
        while node != ROOT {
            let parent = self.up[node] as usize;
            path.push(self.right[parent] as usize == node);
            node = parent;
        }
        for &bit in path.iter().rev() {
            writer.write_bit(bit);
        }
        self.splay(symbol);
    }

    fn decode(&mut self, reader: &mut BitReader<'_>) -> Option<u8> {
        let mut node = ROOT;
        while node < LEAF_BASE {
            node = if reader.read_bit()? {
                self.right[node] as usize
            } else {
                self.left[node] as usize
            };
        }
        let symbol = (node - LEAF_BASE) as u8;
        self.splay(symbol);
        Some(symbol)
    }

    /// Swap the node with its parent's sibling at every other level,
    /// roughly halving the path from the root to `symbol`.
    fn splay(&mut self, symbol: u8) {
        let mut a = LEAF_BASE + symbol as usize;
        loop {
            let c = self.up[a] as usize;
            if c == ROOT {
                break;
            }
            let d = self.up[c] as usize;
            let mut b = self.left[d] as usize;
            if c == b {
                b = self.right[d] as usize;
                self.right[d] = a as u16;
            } else {
                self.left[d] = a as u16;
            }
            if a == self.left[c] as usize {
                self.left[c] = b as u16;
            } else {
                self.right[c] = b as u16;
            }
            self.up[a] = d as u16;
            self.up[b] = c as u16;
            a = d;
            if a == ROOT {
                break;
            }
        }
    }
}

/// Validated skipping-Huffman coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipHuffman {
    skip_size: u32,
}

impl SkipHuffman {
    pub fn new(skip_size: u32) -> Result<Self> {
        if skip_size == 0 || skip_size > MAX_SKIP_SIZE {
            return Err(CodecError::InvalidParameter {
                codec: "skphuff",
                reason: format!("skip size {skip_size} not in 1..={MAX_SKIP_SIZE}"),
            });
        }
        Ok(Self { skip_size })
    }

    pub fn skip_size(&self) -> u32 {
        self.skip_size
    }

    fn trees(&self) -> Vec<SplayTree> {
        vec![SplayTree::new(); self.skip_size as usize]
    }

    pub fn encode(&self, raw: &[u8]) -> Vec<u8> {
        let mut trees = self.trees();
        let mut writer = BitWriter::with_capacity(raw.len());
        let mut path = Vec::with_capacity(64);
        let skip = trees.len();
        for (i, &byte) in raw.iter().enumerate() {
            trees[i % skip].encode(byte, &mut writer, &mut path);
        }
        writer.finish()
    }

    pub fn decode(&self, encoded: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let mut trees = self.trees();
        let mut reader = BitReader::new(encoded);
        let mut out = Vec::with_capacity(raw_len);
        for i in 0..raw_len {
            let tree = &mut trees[i % self.skip_size as usize];
            let byte = tree.decode(&mut reader).ok_or(CodecError::Truncated {
                codec: "skphuff",
                produced: out.len(),
                expected: raw_len,
            })?;
            out.push(byte);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(len: usize) -> Vec<u8> {
        // 16-bit big-endian ramp: high bytes barely change, low bytes cycle
        (0..len as u32 / 2)
            .flat_map(|i| ((1000 + i / 40) as u16).to_be_bytes())
            .collect()
    }

    #[test]
    fn fresh_tree_codes_every_symbol_in_eight_bits() {
        let coder = SkipHuffman::new(1).unwrap();
        let enc = coder.encode(&[0xa5]);
        assert_eq!(enc, vec![0xa5]);
    }

    #[test]
    fn skewed_input_shrinks() {
        let raw: Vec<u8> = (0..8192u32).map(|i| if i % 9 == 0 { b'x' } else { b'a' }).collect();
        let coder = SkipHuffman::new(1).unwrap();
        let enc = coder.encode(&raw);
        assert!(enc.len() < raw.len() / 2, "encoded {} bytes", enc.len());
        assert_eq!(coder.decode(&enc, raw.len()).unwrap(), raw);
    }

    #[test]
    fn interleaved_fields_round_trip() {
        let raw = samples(4096);
        for skip in [1, 2, 3, 8] {
            let coder = SkipHuffman::new(skip).unwrap();
            let enc = coder.encode(&raw);
            assert_eq!(coder.decode(&enc, raw.len()).unwrap(), raw, "skip {skip}");
        }
    }

    #[test]
    fn every_byte_value_round_trips() {
        let raw: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).cycle().take(5000).collect();
        let coder = SkipHuffman::new(4).unwrap();
        assert_eq!(coder.decode(&coder.encode(&raw), raw.len()).unwrap(), raw);
    }

    #[test]
    fn truncated_input_fails() {
        let raw = samples(256);
        let coder = SkipHuffman::new(2).unwrap();
        let enc = coder.encode(&raw);
        assert!(matches!(
            coder.decode(&enc[..enc.len() / 2], raw.len()),
            Err(CodecError::Truncated { codec: "skphuff", .. })
        ));
    }

    #[test]
    fn skip_size_bounds() {
        assert!(SkipHuffman::new(0).is_err());
        assert!(SkipHuffman::new(MAX_SKIP_SIZE + 1).is_err());
        assert_eq!(SkipHuffman::new(MAX_SKIP_SIZE).unwrap().skip_size(), MAX_SKIP_SIZE);
    }
}
