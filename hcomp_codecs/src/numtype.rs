//! Number-type codes understood by the N-bit kernel.
//!
//! The low 12 bits select the base type; the flag bits select native or
//! little-endian byte order for the stored elements.

use crate::error::{CodecError, Result};

pub const DFNT_UCHAR8: i32 = 3;
pub const DFNT_CHAR8: i32 = 4;
pub const DFNT_FLOAT32: i32 = 5;
pub const DFNT_FLOAT64: i32 = 6;
pub const DFNT_INT8: i32 = 20;
pub const DFNT_UINT8: i32 = 21;
pub const DFNT_INT16: i32 = 22;
pub const DFNT_UINT16: i32 = 23;
pub const DFNT_INT32: i32 = 24;
pub const DFNT_UINT32: i32 = 25;
pub const DFNT_INT64: i32 = 26;
pub const DFNT_UINT64: i32 = 27;

/// Elements are stored in the host's byte order.
pub const DFNT_NATIVE: i32 = 0x1000;
/// Elements are stored little-endian.
pub const DFNT_LITEND: i32 = 0x4000;

const BASE_MASK: i32 = 0x0fff;

/// Size in bytes of one element of number type `nt`.
pub fn number_type_size(nt: i32) -> Result<usize> {
    if nt < 0 || nt & !(BASE_MASK | DFNT_NATIVE | DFNT_LITEND) != 0 {
        return Err(CodecError::UnknownNumberType(nt));
    }
    match nt & BASE_MASK {
        DFNT_UCHAR8 | DFNT_CHAR8 | DFNT_INT8 | DFNT_UINT8 => Ok(1),
        DFNT_INT16 | DFNT_UINT16 => Ok(2),
        DFNT_FLOAT32 | DFNT_INT32 | DFNT_UINT32 => Ok(4),
        DFNT_FLOAT64 | DFNT_INT64 | DFNT_UINT64 => Ok(8),
        _ => Err(CodecError::UnknownNumberType(nt)),
    }
}

/// Whether elements of `nt` are laid out least-significant byte first.
pub fn is_little_endian(nt: i32) -> bool {
    if nt & DFNT_LITEND != 0 {
        return true;
    }
    nt & DFNT_NATIVE != 0 && cfg!(target_endian = "little")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_base_type() {
        assert_eq!(number_type_size(DFNT_UINT8).unwrap(), 1);
        assert_eq!(number_type_size(DFNT_INT16).unwrap(), 2);
        assert_eq!(number_type_size(DFNT_FLOAT32).unwrap(), 4);
        assert_eq!(number_type_size(DFNT_UINT64).unwrap(), 8);
        assert_eq!(number_type_size(DFNT_INT32 | DFNT_LITEND).unwrap(), 4);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert_eq!(number_type_size(0), Err(CodecError::UnknownNumberType(0)));
        assert_eq!(number_type_size(99), Err(CodecError::UnknownNumberType(99)));
        assert_eq!(number_type_size(-5), Err(CodecError::UnknownNumberType(-5)));
        assert!(number_type_size(DFNT_INT16 | 0x2000).is_err());
    }

    #[test]
    fn byte_order_flags() {
        assert!(!is_little_endian(DFNT_INT32));
        assert!(is_little_endian(DFNT_INT32 | DFNT_LITEND));
        assert_eq!(
            is_little_endian(DFNT_INT32 | DFNT_NATIVE),
            cfg!(target_endian = "little")
        );
    }
}
