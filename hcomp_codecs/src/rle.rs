//! Run-length coding.
//!
//! A control byte with the high bit set introduces a repeat: the low seven
//! bits hold `count - MIN_RUN` and one data byte follows. A control byte with
//! the high bit clear introduces `control + 1` literal bytes.

use crate::error::{CodecError, Result};

/// Shortest repeat worth encoding as a run.
pub const MIN_RUN: usize = 3;
/// Longest repeat one control byte can describe.
pub const MAX_RUN: usize = 0x7f + MIN_RUN;
/// Longest literal stretch one control byte can describe.
pub const MAX_LITERAL: usize = 0x80;

const RUN_FLAG: u8 = 0x80;

pub fn encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / MAX_LITERAL + 1);
    let mut literal_start = 0;
    let mut i = 0;

    while i < raw.len() {
        let byte = raw[i];
        let mut run = 1;
        while i + run < raw.len() && raw[i + run] == byte && run < MAX_RUN {
            run += 1;
        }

        if run >= MIN_RUN {
            push_literals(&mut out, &raw[literal_start..i]);
            out.push(RUN_FLAG | (run - MIN_RUN) as u8);
            out.push(byte);
            literal_start = i + run;
        }
        i += run;
    }
    push_literals(&mut out, &raw[literal_start..]);
    out
}

fn push_literals(out: &mut Vec<u8>, literals: &[u8]) {
    for chunk in literals.chunks(MAX_LITERAL) {
        out.push((chunk.len() - 1) as u8);
        out.extend_from_slice(chunk);
    }
}

/// Decode exactly `raw_len` bytes from `encoded`.
pub fn decode(encoded: &[u8], raw_len: usize) -> Result<Vec<u8>> {
    let truncated = |produced| CodecError::Truncated {
        codec: "rle",
        produced,
        expected: raw_len,
    };

    let mut out = Vec::with_capacity(raw_len);
    let mut i = 0;
    while out.len() < raw_len {
        let control = *encoded.get(i).ok_or_else(|| truncated(out.len()))?;
        i += 1;

        if control & RUN_FLAG != 0 {
            let count = (control & !RUN_FLAG) as usize + MIN_RUN;
            let byte = *encoded.get(i).ok_or_else(|| truncated(out.len()))?;
            i += 1;
            out.resize(out.len() + count, byte);
        } else {
            let count = control as usize + 1;
            let literals = encoded
                .get(i..i + count)
                .ok_or_else(|| truncated(out.len()))?;
            i += count;
            out.extend_from_slice(literals);
        }
    }
    out.truncate(raw_len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn repeats_collapse_to_two_bytes() {
        let raw = vec![7u8; 100];
        let enc = encode(&raw);
        assert_eq!(enc, vec![RUN_FLAG | (100 - MIN_RUN) as u8, 7]);
        assert_eq!(decode(&enc, raw.len()).unwrap(), raw);
    }

    #[test]
    fn long_repeats_split_at_max_run() {
        let raw = vec![0u8; MAX_RUN * 2 + 1];
        let enc = encode(&raw);
        // two full runs and one literal
        assert_eq!(enc.len(), 2 + 2 + 2);
        assert_eq!(decode(&enc, raw.len()).unwrap(), raw);
    }

    #[test]
    fn short_repeats_stay_literal() {
        let raw = b"aabbcc";
        let enc = encode(raw);
        assert_eq!(enc[0], 5);
        assert_eq!(&enc[1..], raw);
    }

    #[test]
    fn mixed_content_round_trips() {
        let mut raw = Vec::new();
        for i in 0..2000u32 {
            if i % 17 < 9 {
                raw.push(0x55);
            } else {
                raw.push((i * 31 % 251) as u8);
            }
        }
        assert_eq!(decode(&encode(&raw), raw.len()).unwrap(), raw);
    }

    #[test]
    fn empty_input() {
        assert!(encode(&[]).is_empty());
        assert!(decode(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn truncated_literal_fails() {
        let enc = encode(b"abcdef");
        let err = decode(&enc[..4], 6).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { codec: "rle", .. }));
    }

    proptest! {
        #[test]
        fn runs_and_literals_decode_to_input(
            raw in prop::collection::vec(prop_oneof![Just(0u8), Just(0xffu8), any::<u8>()], 0..2048)
        ) {
            let enc = encode(&raw);
            prop_assert!(enc.len() <= raw.len() + raw.len().div_ceil(MAX_LITERAL));
            prop_assert_eq!(decode(&enc, raw.len()).unwrap(), raw);
        }
    }
}
