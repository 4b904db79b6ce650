//! Bump allocation over caller-supplied memory.
//!
//! A [`Region`] never allocates its own backing memory: a process hands it a
//! byte buffer once at startup and every later allocation is offset
//! arithmetic over that buffer. Allocations are handed out as [`Span`]s
//! (offset/length pairs) rather than raw pointers, and all alignment math is
//! performed on offsets.
//!
//! ```text
//! +-----------+---+-----------+-----+---------------------------+
//! | span A    |pad| span B    | pad | free                      |
//! +-----------+---+-----------+-----+---------------------------+
//! 0                                 ^ offset                    length
//! ```
//!
//! [`Region::reset`] rewinds `offset` to zero in O(1). Spans handed out
//! before a reset still index into the buffer, but the bytes behind them will
//! be reused (and zeroed) by the next allocation. Holding on to a span across
//! a reset is a caller bug.

use std::fmt;
use std::ops::Range;

/// Alignment used by [`Region::alloc`]: twice the platform pointer width.
pub const DEFAULT_ALIGNMENT: usize = 2 * std::mem::size_of::<usize>();

/// Returns true when `value` is a non-zero power of two.
#[inline]
pub fn is_power_of_two(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Rounds `offset` up to the next multiple of `align`.
///
/// Returns `None` if rounding overflows `usize`.
///
/// # Panics
///
/// Panics if `align` is not a power of two.
#[inline]
pub fn align_forward(offset: usize, align: usize) -> Option<usize> {
    assert_alignment(align);
    let modulo = offset & (align - 1);
    if modulo == 0 {
        Some(offset)
    } else {
        offset.checked_add(align - modulo)
    }
}

fn assert_alignment(align: usize) {
    if !is_power_of_two(align) {
        log::error!("alignment {align} is not a power of two");
        panic!("alignment {align} is not a power of two");
    }
}

/// Byte range handed out by an allocator.
///
/// Offsets are absolute within the buffer of the [`Region`] that produced the
/// span, including spans allocated through a [`Slab`](crate::Slab).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    offset: usize,
    len: usize,
}

impl Span {
    pub(crate) const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// First byte of the span.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes covered by the span.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for zero-length spans.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the span.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// The span as a range usable for slicing.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Returns true if the two spans share at least one byte.
    pub fn overlaps(&self, other: &Span) -> bool {
        !self.is_empty() && !other.is_empty() && self.offset < other.end() && other.offset < self.end()
    }
}

/// Offset-advancing allocator state over `[base, base + length)`.
///
/// Shared by [`Region`] (base zero) and the nested allocator of every slab.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Bump {
    base: usize,
    length: usize,
    offset: usize,
}

impl Bump {
    pub(crate) const fn new(base: usize, length: usize) -> Self {
        Self {
            base,
            length,
            offset: 0,
        }
    }

    pub(crate) fn base(&self) -> usize {
        self.base
    }

    pub(crate) fn length(&self) -> usize {
        self.length
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.length - self.offset
    }

    /// Reserves `size` bytes whose absolute start is a multiple of `align`.
    ///
    /// Leaves the state untouched when the request does not fit.
    pub(crate) fn alloc_aligned(&mut self, size: usize, align: usize) -> Option<Span> {
        let current = self.base.checked_add(self.offset)?;
        let start = align_forward(current, align)? - self.base;
        let end = start.checked_add(size)?;
        if end > self.length {
            return None;
        }
        self.offset = end;
        Some(Span::new(self.base + start, size))
    }

    pub(crate) fn reset(&mut self) {
        self.offset = 0;
    }
}

/// Bump allocator bound to a borrowed byte buffer.
pub struct Region<'buf> {
    buffer: &'buf mut [u8],
    bump: Bump,
}

impl<'buf> Region<'buf> {
    /// Binds a region to `buffer` with nothing allocated.
    pub fn new(buffer: &'buf mut [u8]) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            bump: Bump::new(0, length),
        }
    }

    /// Total capacity in bytes.
    pub fn len(&self) -> usize {
        self.bump.length()
    }

    /// Returns true when the region has zero capacity.
    pub fn is_empty(&self) -> bool {
        self.bump.length() == 0
    }

    /// Next free byte; everything below it is allocated.
    pub fn offset(&self) -> usize {
        self.bump.offset()
    }

    /// Bytes left after the current offset, ignoring alignment.
    pub fn remaining(&self) -> usize {
        self.bump.remaining()
    }

    /// Allocates `size` zeroed bytes starting at a multiple of `align`.
    ///
    /// Returns `None` when the request does not fit; the offset is unchanged
    /// in that case so smaller requests may still succeed.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Option<Span> {
        let Some(span) = self.bump.alloc_aligned(size, align) else {
            log::trace!(
                "region exhausted: size={size} align={align} offset={} len={}",
                self.offset(),
                self.len()
            );
            return None;
        };
        self.buffer[span.range()].fill(0);
        Some(span)
    }

    /// Allocates `size` zeroed bytes aligned to [`DEFAULT_ALIGNMENT`].
    pub fn alloc(&mut self, size: usize) -> Option<Span> {
        self.alloc_aligned(size, DEFAULT_ALIGNMENT)
    }

    /// Logically frees every allocation. Memory is zeroed lazily on reuse.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Borrows the bytes behind `span`.
    ///
    /// # Panics
    ///
    /// Panics if `span` lies outside the region.
    pub fn bytes(&self, span: Span) -> &[u8] {
        &self.buffer[span.range()]
    }

    /// Mutably borrows the bytes behind `span`.
    ///
    /// # Panics
    ///
    /// Panics if `span` lies outside the region.
    pub fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        &mut self.buffer[span.range()]
    }

    pub(crate) fn zero(&mut self, span: Span) {
        self.buffer[span.range()].fill(0);
    }
}

impl fmt::Debug for Region<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("length", &self.len())
            .field("offset", &self.offset())
            .finish()
    }
}
