//! Byte-run kernels behind the compressed-element coders.
//!
//! Every kernel turns a complete run of raw bytes into an independent encoded
//! run and back. Decoders are told how many raw bytes to produce, so padding
//! bits at the end of an encoded run are never misread as data.

pub mod bitio;
mod error;
pub mod nbit;
pub mod numtype;
pub mod rle;
pub mod skphuff;

pub use error::{CodecError, Result};
pub use nbit::{NBit, NBitParams};
pub use numtype::number_type_size;
pub use skphuff::SkipHuffman;
