//! Codec error types.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding wire payloads.
///
/// A malformed payload is never recovered from: callers get the error for that single
/// encode/decode call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before a complete value could be read.
    #[error("truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// Rollup buffer length disagrees with its declared tx count.
    #[error("rollup length mismatch: {num_txs} txs require {expected} bytes, got {actual}")]
    LengthMismatch {
        num_txs: u32,
        expected: usize,
        actual: usize,
    },

    /// Bytes that must be zero-padding were not zero.
    #[error("non-zero padding in field {field}")]
    NonZeroPadding { field: &'static str },

    /// Too many records to express in a `u32` count.
    #[error("{what} count {count} exceeds u32 range")]
    CountOverflow { what: &'static str, count: usize },

    /// Bytes left over after a complete value was decoded.
    #[error("{count} trailing bytes after {what}")]
    TrailingBytes { what: &'static str, count: usize },

    /// Unknown enum discriminant.
    #[error("unknown {what} discriminant {value}")]
    UnknownDiscriminant { what: &'static str, value: u32 },
}
