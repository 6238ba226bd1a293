//! Crate-wide error type.
//!
//! Mirrors the flat, hand-rolled error enum style used by the driver layer
//! this crate's allocator hierarchy is modeled on: one variant per failure
//! kind, a manual `Display`, and a manual `std::error::Error` impl rather
//! than a derive macro.

use std::fmt::{self, Display, Formatter};

/// Describes the general category of failure for this crate's operations.
///
/// Allocation and configuration errors fail construction of the model or the
/// request and are not recoverable in place. Per-pass failures abort the
/// pass and surface here; model-level parameter residency is unaffected by
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The overlap planner or an allocator could not fit within the
    /// configured memory limit.
    InsufficientMemory {
        /// Bytes required by the rejected configuration.
        required: u64,
        /// The configured limit.
        limit: u64,
    },

    /// A [`crate::alloc::SizeLimitedAllocator`] allocation would exceed its
    /// capacity.
    OverLimit {
        /// Bytes requested.
        requested: u64,
        /// Bytes available.
        available: u64,
    },

    /// A [`crate::alloc::ReusedAllocator`] bump allocation would exceed its
    /// capacity.
    OutOfPool {
        /// Bytes requested.
        requested: u64,
        /// Bytes available.
        available: u64,
    },

    /// The load-stream side of a prefetch pass failed; the calc side
    /// aborted the pass.
    PrefetchFailed,

    /// `decode_step` was called with `step_pos >= max_decoder_length`.
    DecodeOverflow,

    /// A decoder operation was requested on an encoder-only model.
    EncoderOnly,

    /// A blank-fill span marker was malformed.
    InvalidSpan {
        /// Byte offset into the input where the malformed marker begins.
        position: usize,
    },

    /// More than 16 span markers were found in a blank-fill input.
    TooManySpans {
        /// The number of spans found.
        found: usize,
    },

    /// No span markers were found in a blank-fill input.
    NoSpans,

    /// The configuration's dimensions are mutually inconsistent.
    BadConfig {
        /// Human-readable explanation.
        reason: &'static str,
    },
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientMemory { required, limit } => write!(
                f,
                "insufficient memory: need at least {required} bytes, limit is {limit} bytes"
            ),
            Self::OverLimit {
                requested,
                available,
            } => write!(
                f,
                "activation allocator over limit: requested {requested} bytes, {available} bytes available"
            ),
            Self::OutOfPool {
                requested,
                available,
            } => write!(
                f,
                "reused allocator out of pool: requested {requested} bytes, {available} bytes available"
            ),
            Self::PrefetchFailed => write!(f, "prefetch load stream failed"),
            Self::DecodeOverflow => write!(f, "decode step exceeds maximum decoder length"),
            Self::EncoderOnly => write!(f, "model is encoder-only"),
            Self::InvalidSpan { position } => {
                write!(f, "invalid span marker at byte offset {position}")
            }
            Self::TooManySpans { found } => {
                write!(f, "too many spans: found {found}, maximum is 16")
            }
            Self::NoSpans => write!(f, "no span markers found in input"),
            Self::BadConfig { reason } => write!(f, "inconsistent configuration: {reason}"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CoreError>;
