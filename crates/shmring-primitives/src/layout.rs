//! Byte layout of a ring region.
//!
//! Writer and readers live in different processes and find every field by
//! offset, so both sides must derive the same offsets from the same geometry.
//! All offsets come from [`field_offset`].
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Exist flag (1 byte, AtomicBool) + 3 bytes padding            │
//! │  buffer_size  (usize, host word)                              │
//! │  buffer_count (usize, host word)                              │
//! │  Write cursor (4 bytes, AtomicU32)                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Slot guards  (buffer_count × 8 bytes)                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Timestamps   (buffer_count × 8 bytes, µs since epoch)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Payloads     (buffer_count × buffer_size bytes)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The geometry words sit at offset 4 and are therefore accessed unaligned on
//! 64-bit hosts. Every atomic field lands on its natural alignment.

use core::fmt;
use core::mem::size_of;

/// Size of the existence flag.
pub const EXIST_FLAG_SIZE: usize = 1;

/// Padding after the existence flag.
pub const EXIST_FLAG_PAD: usize = 3;

/// Size of each geometry word.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Size of the global write cursor.
pub const CURSOR_SIZE: usize = 4;

/// Size of one slot guard (prefix, postfix, 2 bytes padding, index).
pub const GUARD_SIZE: usize = 8;

/// Size of one slot timestamp.
pub const TIMESTAMP_SIZE: usize = 8;

/// Size of the fixed header that precedes the per-slot arrays.
pub const HEADER_SIZE: usize = EXIST_FLAG_SIZE + EXIST_FLAG_PAD + 2 * WORD_SIZE + CURSOR_SIZE;

const _: () = assert!(HEADER_SIZE % 8 == 0);
const _: () = assert!((EXIST_FLAG_SIZE + EXIST_FLAG_PAD + 2 * WORD_SIZE) % CURSOR_SIZE == 0);

/// Logical fields of the region, in on-region order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    ExistFlag,
    BufferSize,
    BufferCount,
    WriteCursor,
    Guards,
    Timestamps,
    Payloads,
    /// One past the final payload byte.
    End,
}

impl Field {
    const ORDER: [Field; 8] = [
        Field::ExistFlag,
        Field::BufferSize,
        Field::BufferCount,
        Field::WriteCursor,
        Field::Guards,
        Field::Timestamps,
        Field::Payloads,
        Field::End,
    ];

    fn span(self, buffer_size: usize, buffer_count: usize) -> Result<usize, LayoutError> {
        match self {
            Field::ExistFlag => Ok(EXIST_FLAG_SIZE + EXIST_FLAG_PAD),
            Field::BufferSize | Field::BufferCount => Ok(WORD_SIZE),
            Field::WriteCursor => Ok(CURSOR_SIZE),
            Field::Guards => GUARD_SIZE
                .checked_mul(buffer_count)
                .ok_or(LayoutError::Overflow("guard array size")),
            Field::Timestamps => TIMESTAMP_SIZE
                .checked_mul(buffer_count)
                .ok_or(LayoutError::Overflow("timestamp array size")),
            Field::Payloads => buffer_size
                .checked_mul(buffer_count)
                .ok_or(LayoutError::Overflow("payload array size")),
            Field::End => Ok(0),
        }
    }
}

/// Byte offset of `field` within a region of the given geometry.
///
/// The offset is the sum of the spans of every field that precedes it.
pub fn field_offset(
    field: Field,
    buffer_size: usize,
    buffer_count: usize,
) -> Result<usize, LayoutError> {
    let mut offset = 0usize;
    for preceding in Field::ORDER.iter().take_while(|f| **f < field) {
        offset = offset
            .checked_add(preceding.span(buffer_size, buffer_count)?)
            .ok_or(LayoutError::Overflow("field offset"))?;
    }
    Ok(offset)
}

/// Precomputed offsets for one ring geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    buffer_size: usize,
    buffer_count: usize,
    guards: usize,
    timestamps: usize,
    payloads: usize,
    total: usize,
}

impl RingLayout {
    /// Calculate the layout for `buffer_count` slots of `buffer_size` bytes.
    pub fn calculate(buffer_size: usize, buffer_count: usize) -> Result<Self, LayoutError> {
        if buffer_size == 0 {
            return Err(LayoutError::ZeroBufferSize);
        }
        if buffer_count == 0 {
            return Err(LayoutError::ZeroBufferCount);
        }

        Ok(Self {
            buffer_size,
            buffer_count,
            guards: field_offset(Field::Guards, buffer_size, buffer_count)?,
            timestamps: field_offset(Field::Timestamps, buffer_size, buffer_count)?,
            payloads: field_offset(Field::Payloads, buffer_size, buffer_count)?,
            total: field_offset(Field::End, buffer_size, buffer_count)?,
        })
    }

    /// Offset of a header field or array start.
    pub fn offset(&self, field: Field) -> usize {
        match field {
            Field::ExistFlag => 0,
            Field::BufferSize => EXIST_FLAG_SIZE + EXIST_FLAG_PAD,
            Field::BufferCount => EXIST_FLAG_SIZE + EXIST_FLAG_PAD + WORD_SIZE,
            Field::WriteCursor => HEADER_SIZE - CURSOR_SIZE,
            Field::Guards => self.guards,
            Field::Timestamps => self.timestamps,
            Field::Payloads => self.payloads,
            Field::End => self.total,
        }
    }

    #[inline]
    pub fn guard_offset(&self, slot: usize) -> usize {
        debug_assert!(slot < self.buffer_count);
        self.guards + slot * GUARD_SIZE
    }

    #[inline]
    pub fn timestamp_offset(&self, slot: usize) -> usize {
        debug_assert!(slot < self.buffer_count);
        self.timestamps + slot * TIMESTAMP_SIZE
    }

    #[inline]
    pub fn payload_offset(&self, slot: usize) -> usize {
        debug_assert!(slot < self.buffer_count);
        self.payloads + slot * self.buffer_size
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Bytes occupied by all payload slots.
    #[inline]
    pub fn payload_region_size(&self) -> usize {
        self.total - self.payloads
    }

    /// Total region size in bytes.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total
    }
}

/// Errors from layout calculation or validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// `buffer_size` was zero.
    ZeroBufferSize,
    /// `buffer_count` was zero.
    ZeroBufferCount,
    /// Size arithmetic overflowed `usize`.
    Overflow(&'static str),
    /// The mapped region is smaller than the geometry requires.
    RegionTooSmall { required: usize, found: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroBufferSize => write!(f, "buffer_size must be > 0"),
            Self::ZeroBufferCount => write!(f, "buffer_count must be > 0"),
            Self::Overflow(what) => write!(f, "{what} overflows usize"),
            Self::RegionTooSmall { required, found } => {
                write!(f, "region too small: need {required} bytes, found {found}")
            }
        }
    }
}

impl core::error::Error for LayoutError {}
