//! Bounded LIFO pool of recycled slabs.
//!
//! The stack's entry array lives in the same region as the slabs it
//! recycles, so creating a stack is itself a region allocation:
//!
//! ```text
//! entry (32 bytes): [u64 id][u64 block offset][u64 block len][u64 payload start]
//! ```
//!
//! Entries describe slabs; the bytes of a slab always belong to the parent
//! region. Resetting that region invalidates every stored entry, so a stack
//! must be dropped together with the region it was created from.
//!
//! A stack serves exactly one size class. The first slab pushed or acquired
//! fixes it and any later mismatch is treated as a contract violation.

use crate::region::{Region, Span};
use crate::slab::Slab;
use crate::{TransportError, TransportResult};

/// Bytes used by one stack entry inside the region.
pub const SLAB_STACK_ENTRY_SIZE: usize = 32;

const ENTRY_ALIGNMENT: usize = 8;

/// Result of pushing a slab onto the stack.
#[derive(Debug, PartialEq, Eq)]
pub enum SlabPush {
    /// The slab was reset and stored.
    Ok,
    /// The stack is full; the slab is handed back untouched.
    Full(Slab),
}

/// Recycling stack for slabs of a single size class.
#[derive(Debug)]
pub struct SlabStack {
    entries: Span,
    count: usize,
    capacity: usize,
    size_class: Option<usize>,
}

impl SlabStack {
    /// Allocates room for `capacity` entries from `region`.
    pub fn new(region: &mut Region<'_>, capacity: usize) -> TransportResult<Self> {
        let remaining = region.remaining();
        let bytes = capacity
            .checked_mul(SLAB_STACK_ENTRY_SIZE)
            .ok_or(TransportError::RegionExhausted {
                requested: usize::MAX,
                remaining,
            })?;
        let entries = region
            .alloc_aligned(bytes, ENTRY_ALIGNMENT)
            .ok_or(TransportError::RegionExhausted {
                requested: bytes,
                remaining,
            })?;
        Ok(Self {
            entries,
            count: 0,
            capacity,
            size_class: None,
        })
    }

    /// Maximum number of slabs the stack holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slabs currently stored.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true when no slab is stored.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns true when a push would be refused.
    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Payload size every slab in this stack must have, once known.
    pub fn size_class(&self) -> Option<usize> {
        self.size_class
    }

    /// Resets `slab` and stores it on top of the stack.
    ///
    /// # Panics
    ///
    /// Panics if the slab's payload size differs from the stack's size class.
    pub fn push(&mut self, region: &mut Region<'_>, mut slab: Slab) -> SlabPush {
        self.check_size_class(slab.payload_size());
        if self.is_full() {
            log::debug!(
                "slab stack full ({}), refusing slab {}",
                self.capacity,
                slab.id()
            );
            return SlabPush::Full(slab);
        }

        slab.reset();
        let entry = self.entry(self.count);
        let out = region.bytes_mut(entry);
        let block = slab.block();
        out[0..8].copy_from_slice(&slab.id().to_le_bytes());
        out[8..16].copy_from_slice(&(block.offset() as u64).to_le_bytes());
        out[16..24].copy_from_slice(&(block.len() as u64).to_le_bytes());
        out[24..32].copy_from_slice(&(slab.payload().offset() as u64).to_le_bytes());
        self.count += 1;
        SlabPush::Ok
    }

    /// Removes the most recently pushed slab, which is always empty.
    pub fn pop(&mut self, region: &Region<'_>) -> Option<Slab> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;

        let bytes = region.bytes(self.entry(self.count));
        let word = |i: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_le_bytes(raw)
        };
        let id = word(0);
        let block = Span::new(word(1) as usize, word(2) as usize);
        let payload_start = word(3) as usize;
        Some(Slab::from_parts(id, block, payload_start))
    }

    /// Pops a recycled slab or, when none is left, creates one from `region`.
    ///
    /// Either way the slab comes back empty and stamped with `id`.
    ///
    /// # Panics
    ///
    /// Panics if `size` differs from the stack's size class.
    pub fn acquire(&mut self, region: &mut Region<'_>, size: usize, id: u64) -> TransportResult<Slab> {
        self.check_size_class(size);
        let mut slab = match self.pop(region) {
            Some(slab) => slab,
            None => Slab::create(region, size, id)?,
        };
        slab.stamp(region, id);
        Ok(slab)
    }

    /// Returns a slab for reuse. A full stack drops the handle instead; its
    /// bytes stay allocated in the region until the region is reset.
    pub fn release(&mut self, region: &mut Region<'_>, slab: Slab) -> SlabPush {
        let outcome = self.push(region, slab);
        if let SlabPush::Full(slab) = &outcome {
            log::trace!("abandoning slab {} to its region", slab.id());
        }
        outcome
    }

    fn entry(&self, index: usize) -> Span {
        Span::new(
            self.entries.offset() + index * SLAB_STACK_ENTRY_SIZE,
            SLAB_STACK_ENTRY_SIZE,
        )
    }

    fn check_size_class(&mut self, size: usize) {
        let class = *self.size_class.get_or_insert(size);
        if class != size {
            log::error!("slab of {size} bytes offered to a stack of {class} byte slabs");
            panic!("slab size class mismatch: stack holds {class} byte slabs, got {size}");
        }
    }
}
