//! Core memory and message primitives shared by every process on the bus.
//!
//! This crate exposes the pieces the rest of the workspace is built on:
//! * [`Region`] – bump allocator over a caller-supplied byte buffer.
//! * [`Slab`] – size-class sub-region carved out of a parent [`Region`].
//! * [`SlabStack`] – bounded LIFO pool recycling emptied slabs of one size class.
//! * [`Message`] – fixed-layout inter-process record and its wire codec.
//! * [`TransportError`] – lightweight error surface for allocation and codec failures.

mod error;
mod region;
pub mod schema;
mod slab;
mod slab_stack;

pub use error::{TransportError, TransportResult};
pub use region::{align_forward, is_power_of_two, Region, Span, DEFAULT_ALIGNMENT};
pub use schema::*;
pub use slab::{Slab, SlabHeader, SLAB_HEADER_SIZE};
pub use slab_stack::{SlabPush, SlabStack, SLAB_STACK_ENTRY_SIZE};
