//! MSB-first bit packing shared by the N-bit and skipping-Huffman kernels.

use crate::error::{CodecError, Result};

/// Accumulates bits most-significant first into a byte vector.
#[derive(Debug, Default)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u8,
    filled: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            out: Vec::with_capacity(bytes),
            ..Self::default()
        }
    }

    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.acc = (self.acc << 1) | bit as u8;
        self.filled += 1;
        if self.filled == 8 {
            self.out.push(self.acc);
            self.acc = 0;
            self.filled = 0;
        }
    }

    /// Write the low `count` bits of `value`, highest bit first. `count <= 64`.
    pub fn write_bits(&mut self, value: u64, count: u32) {
        debug_assert!(count <= 64);
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.out.len() * 8 + self.filled as usize
    }

    /// Pad the final partial byte with zeros and return the packed bytes.
    pub fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.out.push(self.acc << (8 - self.filled));
        }
        self.out
    }
}

/// Reads bits most-significant first from a byte slice.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    #[inline]
    pub fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.data.get(self.bit_pos / 8)?;
        let bit = (byte >> (7 - (self.bit_pos % 8))) & 1 == 1;
        self.bit_pos += 1;
        Some(bit)
    }

    /// Read `count` bits into the low end of a `u64`. `count <= 64`.
    pub fn read_bits(&mut self, count: u32, codec: &'static str) -> Result<u64> {
        let mut value = 0u64;
        for _ in 0..count {
            let bit = self.read_bit().ok_or(CodecError::Truncated {
                codec,
                produced: self.bit_pos / 8,
                expected: self.bit_pos / 8 + 1,
            })?;
            value = (value << 1) | bit as u64;
        }
        Ok(value)
    }

    pub fn bits_remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_byte_is_zero_padded() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        assert_eq!(w.bit_len(), 3);
        assert_eq!(w.finish(), vec![0b1010_0000]);
    }

    #[test]
    fn fields_cross_byte_boundaries() {
        let mut w = BitWriter::new();
        w.write_bits(0x3ff, 10);
        w.write_bits(0x2, 6);
        let bytes = w.finish();
        assert_eq!(bytes, vec![0xff, 0xc2]);

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(10, "test").unwrap(), 0x3ff);
        assert_eq!(r.read_bits(6, "test").unwrap(), 0x2);
        assert_eq!(r.bits_remaining(), 0);
    }

    #[test]
    fn reading_past_the_end_fails() {
        let mut r = BitReader::new(&[0xaa]);
        assert!(r.read_bits(8, "test").is_ok());
        assert!(matches!(
            r.read_bits(1, "test"),
            Err(CodecError::Truncated { codec: "test", .. })
        ));
    }
}
