//! Slabs: nested bump allocators carved out of a parent region.
//!
//! A slab is created with a single parent allocation holding its header and
//! its payload back to back:
//!
//! ```text
//! +---------------------+---------+------------------------------------+
//! | header (20 bytes)   | padding | payload (effective size)           |
//! | magic | id | size   |         | nested bump allocator range        |
//! +---------------------+---------+------------------------------------+
//! ^ block start                   ^ aligned payload start      block end ^
//! ```
//!
//! The parent region owns the bytes. A [`Slab`] only records offsets into the
//! parent buffer, so every operation touching memory takes the parent
//! explicitly. A slab must not be used after its parent was reset.

use crate::region::{align_forward, Bump, Region, Span, DEFAULT_ALIGNMENT};
use crate::{TransportError, TransportResult};

/// Bytes reserved in front of every slab payload.
pub const SLAB_HEADER_SIZE: usize = 20;

const SLAB_MAGIC: u32 = 0x534C_4142; // "SLAB"

/// Metadata stored at the start of a slab's parent block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlabHeader {
    /// Identifier currently stamped on the slab.
    pub id: u64,
    /// Payload size requested at creation (the slab's size class).
    pub payload_size: u64,
}

impl SlabHeader {
    fn write(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&SLAB_MAGIC.to_le_bytes());
        out[4..12].copy_from_slice(&self.id.to_le_bytes());
        out[12..20].copy_from_slice(&self.payload_size.to_le_bytes());
    }

    fn read(bytes: &[u8]) -> Option<Self> {
        let magic = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        if magic != SLAB_MAGIC {
            return None;
        }
        Some(Self {
            id: u64::from_le_bytes(bytes[4..12].try_into().ok()?),
            payload_size: u64::from_le_bytes(bytes[12..20].try_into().ok()?),
        })
    }
}

/// Size-class allocation unit living inside a parent [`Region`].
#[derive(Debug, PartialEq, Eq)]
pub struct Slab {
    id: u64,
    block: Span,
    payload_size: usize,
    bump: Bump,
}

impl Slab {
    /// Carves a slab with `payload_size` requested bytes out of `parent`,
    /// aligning the payload to [`DEFAULT_ALIGNMENT`].
    pub fn create(parent: &mut Region<'_>, payload_size: usize, id: u64) -> TransportResult<Self> {
        Self::create_aligned(parent, payload_size, DEFAULT_ALIGNMENT, id)
    }

    /// Carves a slab whose payload starts at a multiple of `align`.
    ///
    /// The header and payload come from one `parent.alloc` call. The padding
    /// between header and payload is taken out of the requested size, and
    /// construction fails once that padding is at least as large as what is
    /// left. The parent block stays allocated in that case, as with any bump
    /// allocation, until the parent is reset.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn create_aligned(
        parent: &mut Region<'_>,
        payload_size: usize,
        align: usize,
        id: u64,
    ) -> TransportResult<Self> {
        let total = SLAB_HEADER_SIZE
            .checked_add(payload_size)
            .ok_or(TransportError::RegionExhausted {
                requested: payload_size,
                remaining: parent.remaining(),
            })?;
        let remaining = parent.remaining();
        let block = parent.alloc(total).ok_or(TransportError::RegionExhausted {
            requested: total,
            remaining,
        })?;

        let header_end = block.offset() + SLAB_HEADER_SIZE;
        let payload_start = align_forward(header_end, align).unwrap_or(usize::MAX);
        let padding = payload_start.saturating_sub(header_end);
        let effective = payload_size.saturating_sub(padding);
        if padding >= effective {
            log::debug!(
                "slab {id}: padding {padding} leaves {effective} of {payload_size} payload bytes"
            );
            return Err(TransportError::SlabPadding {
                padding,
                payload_size,
            });
        }

        let header = SlabHeader {
            id,
            payload_size: payload_size as u64,
        };
        header.write(parent.bytes_mut(Span::new(block.offset(), SLAB_HEADER_SIZE)));

        Ok(Self::from_parts(id, block, payload_start))
    }

    /// Rebuilds an empty slab from its recorded layout.
    pub(crate) fn from_parts(id: u64, block: Span, payload_start: usize) -> Self {
        Self {
            id,
            block,
            payload_size: block.len() - SLAB_HEADER_SIZE,
            bump: Bump::new(payload_start, block.end() - payload_start),
        }
    }

    /// Identifier stamped on the slab.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Payload size requested at creation; all slabs of one size class share it.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Usable payload bytes after alignment padding.
    pub fn capacity(&self) -> usize {
        self.bump.length()
    }

    /// Bytes lost between header and payload to alignment.
    pub fn padding(&self) -> usize {
        self.payload_size - self.capacity()
    }

    /// Bytes consumed by the nested allocator, padding included.
    pub fn used(&self) -> usize {
        self.bump.offset()
    }

    /// Payload bytes still available, ignoring alignment.
    pub fn remaining(&self) -> usize {
        self.bump.remaining()
    }

    /// Parent block holding header, padding and payload.
    pub fn block(&self) -> Span {
        self.block
    }

    /// Parent range backing the nested allocator.
    pub fn payload(&self) -> Span {
        Span::new(self.bump.base(), self.bump.length())
    }

    /// Allocates `size` zeroed bytes from the slab payload.
    ///
    /// Returns `None` when the payload is exhausted; the parent region is
    /// never consulted.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn alloc_aligned(&mut self, parent: &mut Region<'_>, size: usize, align: usize) -> Option<Span> {
        let span = self.bump.alloc_aligned(size, align)?;
        parent.zero(span);
        Some(span)
    }

    /// Allocates `size` zeroed bytes aligned to [`DEFAULT_ALIGNMENT`].
    pub fn alloc(&mut self, parent: &mut Region<'_>, size: usize) -> Option<Span> {
        self.alloc_aligned(parent, size, DEFAULT_ALIGNMENT)
    }

    /// Frees everything allocated from the slab.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Re-stamps the identifier, in the handle and in the parent header.
    pub fn stamp(&mut self, parent: &mut Region<'_>, id: u64) {
        self.id = id;
        let header = SlabHeader {
            id,
            payload_size: self.payload_size as u64,
        };
        header.write(parent.bytes_mut(Span::new(self.block.offset(), SLAB_HEADER_SIZE)));
    }

    /// Reads the header back from the parent, or `None` if it was overwritten.
    pub fn header(&self, parent: &Region<'_>) -> Option<SlabHeader> {
        SlabHeader::read(parent.bytes(Span::new(self.block.offset(), SLAB_HEADER_SIZE)))
    }
}
