use thiserror::Error;

/// Failures raised by the byte-run kernels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded run ended before `raw_len` bytes could be produced.
    #[error("{codec}: encoded data truncated after {produced} of {expected} bytes")]
    Truncated {
        codec: &'static str,
        produced: usize,
        expected: usize,
    },

    /// The number type code does not name a known numeric type.
    #[error("unknown number type {0}")]
    UnknownNumberType(i32),

    /// A kernel parameter is out of range.
    #[error("invalid {codec} parameter: {reason}")]
    InvalidParameter { codec: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, CodecError>;
