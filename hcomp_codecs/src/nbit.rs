//! N-bit coding: keep a fixed bit field out of every numeric element.
//!
//! The field spans bits `start_bit - bit_len + 1 ..= start_bit` of each
//! element (bit 0 is the least significant). Decoding rebuilds full elements,
//! filling the discarded bits with ones or zeros and optionally sign-extending
//! from the top bit of the field.

use crate::bitio::{BitReader, BitWriter};
use crate::error::{CodecError, Result};
use crate::numtype::{is_little_endian, number_type_size};

/// Caller-supplied N-bit parameters, as stored in an element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NBitParams {
    pub nt: i32,
    pub sign_ext: bool,
    pub fill_one: bool,
    pub start_bit: i32,
    pub bit_len: i32,
}

/// Validated N-bit coder with its number type resolved to a byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NBit {
    params: NBitParams,
    nt_size: usize,
    little_endian: bool,
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl NBit {
    pub fn new(params: NBitParams) -> Result<Self> {
        let nt_size = number_type_size(params.nt)?;
        let type_bits = nt_size as i32 * 8;
        let invalid = |reason: String| CodecError::InvalidParameter {
            codec: "nbit",
            reason,
        };

        if params.bit_len < 1 {
            return Err(invalid(format!("bit length {} < 1", params.bit_len)));
        }
        if params.start_bit < 0 || params.start_bit >= type_bits {
            return Err(invalid(format!(
                "start bit {} outside a {}-bit element",
                params.start_bit, type_bits
            )));
        }
        if params.bit_len > params.start_bit + 1 {
            return Err(invalid(format!(
                "{} bits do not fit below start bit {}",
                params.bit_len, params.start_bit
            )));
        }

        Ok(Self {
            params,
            nt_size,
            little_endian: is_little_endian(params.nt),
        })
    }

    pub fn params(&self) -> NBitParams {
        self.params
    }

    /// Bytes per element of the source number type.
    pub fn nt_size(&self) -> usize {
        self.nt_size
    }

    fn shift(&self) -> u32 {
        (self.params.start_bit + 1 - self.params.bit_len) as u32
    }

    fn load(&self, bytes: &[u8]) -> u64 {
        if self.little_endian {
            bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | b as u64)
        } else {
            bytes.iter().fold(0, |acc, &b| (acc << 8) | b as u64)
        }
    }

    fn store(&self, value: u64, out: &mut Vec<u8>) {
        for i in 0..self.nt_size {
            let byte_shift = if self.little_endian {
                i * 8
            } else {
                (self.nt_size - 1 - i) * 8
            };
            out.push((value >> byte_shift) as u8);
        }
    }

    /// Pack the bit field of every element. A trailing partial element is
    /// zero-padded.
    pub fn encode(&self, raw: &[u8]) -> Vec<u8> {
        let bit_len = self.params.bit_len as u32;
        let field_mask = low_mask(bit_len);
        let shift = self.shift();
        let elements = raw.len().div_ceil(self.nt_size);
        let mut writer = BitWriter::with_capacity((elements * bit_len as usize).div_ceil(8));

        let mut padded = vec![0u8; self.nt_size];
        for chunk in raw.chunks(self.nt_size) {
            let element = if chunk.len() == self.nt_size {
                chunk
            } else {
                padded[..chunk.len()].copy_from_slice(chunk);
                &padded[..]
            };
            let field = (self.load(element) >> shift) & field_mask;
            writer.write_bits(field, bit_len);
        }
        writer.finish()
    }

    /// Rebuild `raw_len` bytes of elements from packed fields.
    pub fn decode(&self, encoded: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let bit_len = self.params.bit_len as u32;
        let field_mask = low_mask(bit_len);
        let shift = self.shift();
        let type_mask = low_mask(self.nt_size as u32 * 8);
        let above_field = type_mask & !low_mask(self.params.start_bit as u32 + 1);
        let elements = raw_len.div_ceil(self.nt_size);

        let mut reader = BitReader::new(encoded);
        let mut out = Vec::with_capacity(elements * self.nt_size);
        for _ in 0..elements {
            let field = reader
                .read_bits(bit_len, "nbit")
                .map_err(|_| CodecError::Truncated {
                    codec: "nbit",
                    produced: out.len(),
                    expected: raw_len,
                })?;

            let mut value = if self.params.fill_one { type_mask } else { 0 };
            value &= !(field_mask << shift);
            value |= field << shift;

            if self.params.sign_ext {
                if (field >> (bit_len - 1)) & 1 == 1 {
                    value |= above_field;
                } else {
                    value &= !above_field;
                }
            }
            self.store(value, &mut out);
        }
        out.truncate(raw_len);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numtype::{DFNT_INT16, DFNT_INT32, DFNT_LITEND, DFNT_UINT8};

    fn params(nt: i32, start_bit: i32, bit_len: i32) -> NBitParams {
        NBitParams {
            nt,
            sign_ext: false,
            fill_one: false,
            start_bit,
            bit_len,
        }
    }

    #[test]
    fn signed_values_survive_with_sign_extension() {
        let nbit = NBit::new(NBitParams {
            sign_ext: true,
            ..params(DFNT_INT16, 11, 12)
        })
        .unwrap();
        let values: [i16; 6] = [-5, 100, -300, 2047, -2048, 0];
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();

        let enc = nbit.encode(&raw);
        // six 12-bit fields
        assert_eq!(enc.len(), 9);
        assert_eq!(nbit.decode(&enc, raw.len()).unwrap(), raw);
    }

    #[test]
    fn discarded_bits_take_the_fill_value() {
        let raw = [0b0000_0100u8];

        let zeros = NBit::new(params(DFNT_UINT8, 3, 2)).unwrap();
        let enc = zeros.encode(&raw);
        assert_eq!(zeros.decode(&enc, 1).unwrap(), vec![0b0000_0100]);

        let ones = NBit::new(NBitParams {
            fill_one: true,
            ..params(DFNT_UINT8, 3, 2)
        })
        .unwrap();
        assert_eq!(ones.decode(&enc, 1).unwrap(), vec![0b1111_0111]);
    }

    #[test]
    fn little_endian_elements() {
        let nbit = NBit::new(params(DFNT_INT32 | DFNT_LITEND, 15, 16)).unwrap();
        let values: [u32; 3] = [0x1234, 0xbeef, 0x0001];
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let enc = nbit.encode(&raw);
        assert_eq!(enc.len(), 6);
        assert_eq!(nbit.decode(&enc, raw.len()).unwrap(), raw);
    }

    #[test]
    fn trailing_partial_element_is_truncated() {
        let nbit = NBit::new(params(DFNT_INT16, 15, 16)).unwrap();
        let raw = [0x12, 0x34, 0x56];
        let enc = nbit.encode(&raw);
        assert_eq!(nbit.decode(&enc, 3).unwrap(), raw.to_vec());
    }

    #[test]
    fn parameter_validation() {
        assert!(matches!(
            NBit::new(params(77, 7, 8)),
            Err(CodecError::UnknownNumberType(77))
        ));
        assert!(NBit::new(params(DFNT_UINT8, 8, 1)).is_err());
        assert!(NBit::new(params(DFNT_UINT8, 3, 5)).is_err());
        assert!(NBit::new(params(DFNT_UINT8, 3, 0)).is_err());
        assert_eq!(NBit::new(params(DFNT_INT16, 15, 16)).unwrap().nt_size(), 2);
    }

    #[test]
    fn truncated_fields_fail() {
        let nbit = NBit::new(params(DFNT_INT16, 15, 16)).unwrap();
        let enc = nbit.encode(&[1, 2, 3, 4]);
        assert!(matches!(
            nbit.decode(&enc[..3], 4),
            Err(CodecError::Truncated { codec: "nbit", .. })
        ));
    }
}
