//! Lock-free primitives for broadcasting fixed-size messages over shared memory.
//!
//! This crate provides the `no_std` core of a seqlock-style ring buffer that
//! lives in a raw byte region, typically a memory-mapped shared memory object.
//! One writer overwrites slots in a circle; any number of readers, possibly in
//! other processes, copy slots out and validate the copy against per-slot guard
//! markers.
//!
//! # Primitives
//!
//! - [`RingLayout`] / [`field_offset`]: self-describing byte layout of a region
//! - [`SlotGuard`]: prefix/postfix/index triple bracketing each payload write
//! - [`BroadcastRing`]: the write and read protocols over a [`Region`]
//! - [`Status`]: bitmask describing the outcome of a call
//!
//! # Loom Testing
//!
//! Enable the `loom` feature to model-check the guard protocol across all
//! thread interleavings.
//!
//! ```text
//! cargo test -p shmring-primitives --features loom
//! ```

#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod guard;
pub mod layout;
pub mod region;
pub mod ring;
pub mod status;
pub mod sync;

pub use guard::{GuardSnapshot, MARK_PERIOD, SlotGuard, UNWRITTEN_MARK, write_mark};
pub use layout::{Field, LayoutError, RingLayout, field_offset};
#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use region::Region;
pub use ring::{
    AttachError, BroadcastRing, FIRST_WRITE_INDEX, ReadCursor, ReadMode, ReadOutcome,
};
pub use status::Status;
pub use sync::ATOMICS_LOCK_FREE;
