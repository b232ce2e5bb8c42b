//! # Core Error Types
//!
//! All errors that can occur in the replication primitives.
//!
//! Unresolved entity references are deliberately absent: they are a
//! transient state tracked by the client, not a failure.

use thiserror::Error;

use crate::ghost::{GhostTypeId, Tick};

/// Errors that can occur in the replication primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A mask offset, bit count or similar argument was out of range.
    ///
    /// This is a programmer error and is never silently clamped.
    #[error("invalid argument: {what} = {value}")]
    InvalidArgument {
        /// Which argument was rejected.
        what: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// A serialized payload does not fit in the frame it was meant for.
    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Bytes required.
        size: usize,
        /// Bytes available.
        limit: usize,
    },

    /// A component shape that cannot be replicated.
    #[error("unsupported layout in ghost type '{ghost_type}', component '{component}': {reason}")]
    UnsupportedLayout {
        /// Ghost type name.
        ghost_type: String,
        /// Offending component name.
        component: String,
        /// Why the shape is rejected.
        reason: &'static str,
    },

    /// A ghost type id that was never registered.
    #[error("unknown ghost type: {0}")]
    UnknownGhostType(GhostTypeId),

    /// A ghost type name registered twice.
    #[error("ghost type already registered: {0}")]
    DuplicateGhostType(String),

    /// A history entry older than (or equal to) the newest one.
    #[error("stale tick {tick}: history already holds tick {latest}")]
    StaleTick {
        /// Tick that was rejected.
        tick: Tick,
        /// Newest tick in the history.
        latest: Tick,
    },

    /// A field value of the wrong kind was written into a slot.
    #[error("field kind mismatch at slot {slot}: expected {expected}, found {found}")]
    FieldKindMismatch {
        /// Slot index in the ghost layout.
        slot: usize,
        /// Kind declared by the layout.
        expected: &'static str,
        /// Kind that was supplied.
        found: &'static str,
    },

    /// A ghost id does not fit in 31 bits.
    #[error("ghost index {0} does not fit in 31 bits")]
    GhostIdOutOfRange(u32),

    /// Bit stream ended before a read completed.
    #[error("bit stream truncated: needed {needed} bits, {available} available")]
    Truncated {
        /// Bits requested.
        needed: usize,
        /// Bits remaining.
        available: usize,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Shorthand for an [`CoreError::InvalidArgument`].
    #[inline]
    #[must_use]
    pub fn invalid(what: &'static str, value: impl Into<i64>) -> Self {
        Self::InvalidArgument { what, value: value.into() }
    }
}
