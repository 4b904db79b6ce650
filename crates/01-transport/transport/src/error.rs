//! Error handling helpers for the transport crate.
//!
//! The transport layer keeps its error surface small: slab construction
//! failures and message codec failures. Plain region exhaustion is not an
//! error at all; allocators report it as `None` and leave their state alone.

use std::fmt;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by low-level transport helpers.
pub enum TransportError {
    /// The parent region could not satisfy an allocation.
    RegionExhausted { requested: usize, remaining: usize },
    /// Aligning the slab payload would consume at least half of it.
    SlabPadding { padding: usize, payload_size: usize },
    /// A wire frame did not have the fixed message size.
    FrameLength { expected: usize, actual: usize },
    /// The origin discriminant does not name a known module.
    UnknownOrigin(u32),
    /// The type discriminant does not name a known message kind.
    UnknownType(u32),
    /// A length exceeds the fixed field it describes.
    FieldOverflow {
        field: &'static str,
        len: usize,
        capacity: usize,
    },
    /// A text field was not valid UTF-8 or embeds a NUL byte.
    InvalidText { field: &'static str },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::RegionExhausted {
                requested,
                remaining,
            } => {
                write!(
                    f,
                    "region exhausted: requested {requested} bytes with {remaining} remaining"
                )
            }
            TransportError::SlabPadding {
                padding,
                payload_size,
            } => {
                write!(
                    f,
                    "slab padding of {padding} bytes leaves too little of the {payload_size} byte payload"
                )
            }
            TransportError::FrameLength { expected, actual } => {
                write!(f, "message frame must be {expected} bytes, got {actual}")
            }
            TransportError::UnknownOrigin(raw) => write!(f, "unknown module id {raw}"),
            TransportError::UnknownType(raw) => write!(f, "unknown message type {raw}"),
            TransportError::FieldOverflow {
                field,
                len,
                capacity,
            } => {
                write!(f, "{field} length {len} exceeds capacity {capacity}")
            }
            TransportError::InvalidText { field } => write!(f, "{field} is not NUL-free UTF-8"),
        }
    }
}

impl std::error::Error for TransportError {}
