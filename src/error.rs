//! Error taxonomy for patch application.
//!
//! Every failure is fatal to the current apply call: the engine is a pure
//! computation over in-memory buffers, so retrying cannot change the outcome.

use thiserror::Error;

use crate::patch_format::ActionKind;

/// The patch container itself is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("not a BPS patch: bad magic marker")]
    BadMagic,
    #[error("patch truncated: unexpected end of input")]
    TruncatedInput,
    #[error("action stream runs into the checksum footer")]
    TrailingGarbage,
    #[error("variable-length integer does not fit in 64 bits")]
    VlqOverflow,
}

/// The action stream is inconsistent with the declared sizes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("source is {actual} bytes but the patch expects {declared}")]
    SourceSizeMismatch { declared: u64, actual: u64 },
    /// `start` is signed because a copy delta may move a relative offset
    /// before the beginning of the buffer.
    #[error("{kind} reads [{start}, {end}) outside a buffer of {len} bytes")]
    OutOfBounds {
        kind: ActionKind,
        start: i64,
        end: i64,
        len: u64,
    },
    #[error("patch produces {actual} bytes but declares a target of {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("declared target size of {0} bytes cannot be allocated")]
    TargetTooLarge(u64),
}

/// One of the three footer checksums disagrees.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("source checksum mismatch: expected {expected:08x}, got {actual:08x} (wrong or modified source file)")]
    SourceMismatch { expected: u32, actual: u32 },
    #[error("patch checksum mismatch: expected {expected:08x}, got {actual:08x} (corrupted patch)")]
    PatchCorrupt { expected: u32, actual: u32 },
    #[error("target checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    TargetMismatch { expected: u32, actual: u32 },
}

/// Anything that can go wrong in [`apply_patch`](crate::apply_patch).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
