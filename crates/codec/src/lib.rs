//! Bit-level primitives for the vireo capture pipeline: indexed readers
//! over the packed RAW10/RAW12/RAW16 layouts, the matching repack
//! routines, and the BITNZPACK_2 row entropy codec.
//!
//! Everything here is a pure function over byte slices; no allocation, no
//! state. The transform stage in `vireo` drives these over millions of
//! pixels per frame, so the inner loops are written to stay branch-light.

pub mod bitnzpack;
pub mod raw;

/// Errors emitted by the pack/encode primitives.
///
/// Readers have no error path: the caller guarantees `(x, y)` lies within
/// the packed image, exactly as the capture contract requires.
///
/// # Example
/// ```rust
/// use vireo_codec::CodecError;
///
/// let err = CodecError::OutputTooSmall { needed: 10, available: 4 };
/// assert!(matches!(err, CodecError::OutputTooSmall { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The destination slice cannot hold the full result; nothing was written.
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    OutputTooSmall { needed: usize, available: usize },
    /// An encoded row ended before all samples were recovered.
    #[error("encoded stream truncated ({available} of {needed} bytes present)")]
    Truncated { needed: usize, available: usize },
    /// A row header carried a bit width outside 0..=16.
    #[error("invalid row bit width {0}")]
    InvalidBitWidth(u8),
}

pub mod prelude {
    pub use crate::bitnzpack::{decode_row, encode_row, encoded_capacity};
    pub use crate::raw::{
        pack_raw10_deinterleaved, pack_raw12_deinterleaved, pack_raw12_pair, read_raw10,
        read_raw12, read_raw16,
    };
    pub use crate::CodecError;
}
