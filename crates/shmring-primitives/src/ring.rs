//! Single-writer, multi-reader broadcast ring over a raw region.
//!
//! The writer overwrites slots in a circle and never waits for readers. Each
//! reader keeps a private [`ReadCursor`] and detects on its own whether it fell
//! behind (data loss), raced a write (write in progress) or picked up a slot
//! that was recycled under it (stale data).
//!
//! Only one writer may use a ring at a time. Nothing here enforces that; two
//! concurrent writers corrupt each other's slots.

use crate::guard::{SlotGuard, write_mark};
use crate::layout::{Field, HEADER_SIZE, LayoutError, RingLayout, field_offset};
use crate::region::Region;
use crate::status::Status;
use crate::sync::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Value of a fresh write cursor. Logical write numbers start here.
pub const FIRST_WRITE_INDEX: u32 = 1;

/// Which slot a read targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The oldest slot this reader has not consumed yet.
    Next,
    /// The most recently committed slot.
    Last,
}

/// A reader's private position in the ring.
///
/// Holds the next logical write number the reader expects. Zero means the
/// reader has never read; its first read is served as [`ReadMode::Last`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCursor {
    position: u32,
}

impl ReadCursor {
    pub const fn new() -> Self {
        Self { position: 0 }
    }

    #[inline]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[inline]
    pub fn is_fresh(&self) -> bool {
        self.position == 0
    }

    /// Forget everything read so far; the next read returns the newest slot.
    #[inline]
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

/// Result of a read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub status: Status,
    /// Reader position after the call.
    pub position: u32,
    /// Bytes copied into the output buffer. Only meaningful on success.
    pub len: usize,
    /// Write time (µs since epoch) of the slot that was read, on success.
    pub timestamp_micros: Option<u64>,
}

/// Errors from attaching to an existing ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// The existence flag is cleared: the owner removed the ring.
    Removed,
    /// The header carries an unusable geometry.
    Layout(LayoutError),
}

impl core::fmt::Display for AttachError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Removed => write!(f, "ring has been removed"),
            Self::Layout(e) => write!(f, "invalid ring layout: {e}"),
        }
    }
}

impl core::error::Error for AttachError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Layout(e) => Some(e),
            Self::Removed => None,
        }
    }
}

impl From<LayoutError> for AttachError {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

/// View of a broadcast ring living in a [`Region`].
pub struct BroadcastRing {
    region: Region,
    layout: RingLayout,
}

unsafe impl Send for BroadcastRing {}
unsafe impl Sync for BroadcastRing {}

impl BroadcastRing {
    /// Initialize a new ring in the region.
    ///
    /// Writes the geometry, clears every guard and timestamp, stamps slot 0
    /// with `now_micros`, sets the write cursor to [`FIRST_WRITE_INDEX`] and
    /// finally raises the existence flag.
    ///
    /// # Safety
    ///
    /// The region must be writable and exclusively owned during
    /// initialization, and must stay mapped for the lifetime of the ring.
    pub unsafe fn init(
        region: Region,
        buffer_size: usize,
        buffer_count: usize,
        now_micros: u64,
    ) -> Result<Self, LayoutError> {
        let layout = RingLayout::calculate(buffer_size, buffer_count)?;
        if region.len() < layout.total_size() {
            return Err(LayoutError::RegionTooSmall {
                required: layout.total_size(),
                found: region.len(),
            });
        }

        unsafe {
            region.write_unaligned(layout.offset(Field::BufferSize), buffer_size);
            region.write_unaligned(layout.offset(Field::BufferCount), buffer_count);
            for slot in 0..buffer_count {
                region
                    .get_mut::<SlotGuard>(layout.guard_offset(slot))
                    .init();
                *region.get_mut::<AtomicU64>(layout.timestamp_offset(slot)) = AtomicU64::new(0);
            }
            *region.get_mut::<AtomicU32>(layout.offset(Field::WriteCursor)) =
                AtomicU32::new(0);
            *region.get_mut::<AtomicBool>(layout.offset(Field::ExistFlag)) =
                AtomicBool::new(false);
        }

        let ring = Self { region, layout };
        ring.timestamp(0).store(now_micros, Ordering::Relaxed);
        ring.cursor().store(FIRST_WRITE_INDEX, Ordering::Release);
        ring.exist_flag().store(true, Ordering::Release);
        Ok(ring)
    }

    /// Attach to an existing ring, reading its geometry from the header.
    ///
    /// # Safety
    ///
    /// The region must stay mapped for the lifetime of the ring and must have
    /// been initialized by [`init`](Self::init), possibly in another process.
    pub unsafe fn attach(region: Region) -> Result<Self, AttachError> {
        if region.len() < HEADER_SIZE {
            return Err(LayoutError::RegionTooSmall {
                required: HEADER_SIZE,
                found: region.len(),
            }
            .into());
        }

        let exists = unsafe { region.get::<AtomicBool>(0) };
        if !exists.load(Ordering::Acquire) {
            return Err(AttachError::Removed);
        }

        // Header offsets do not depend on the geometry they describe.
        let size_offset = field_offset(Field::BufferSize, 0, 0)?;
        let count_offset = field_offset(Field::BufferCount, 0, 0)?;
        let buffer_size = unsafe { region.read_unaligned::<usize>(size_offset) };
        let buffer_count = unsafe { region.read_unaligned::<usize>(count_offset) };
        let layout = RingLayout::calculate(buffer_size, buffer_count)?;
        if region.len() < layout.total_size() {
            return Err(LayoutError::RegionTooSmall {
                required: layout.total_size(),
                found: region.len(),
            }
            .into());
        }

        Ok(Self { region, layout })
    }

    #[inline]
    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.layout.buffer_size()
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.layout.buffer_count()
    }

    /// False once the owner has removed the ring.
    #[inline]
    pub fn exists(&self) -> bool {
        self.exist_flag().load(Ordering::Acquire)
    }

    /// Clear the existence flag so every attached reader sees the ring as gone.
    pub fn mark_removed(&self) {
        self.exist_flag().store(false, Ordering::Release);
    }

    /// Next logical write number, i.e. the number of the write to come.
    #[inline]
    pub fn write_cursor(&self) -> u32 {
        self.cursor().load(Ordering::Acquire)
    }

    /// Write `data` into the next slot and publish it.
    ///
    /// Input longer than `buffer_size` is truncated and reported with
    /// [`Status::RANGE_EXCEEDED`]. Must only ever be called by one writer.
    pub fn write(&self, data: &[u8], now_micros: u64) -> Status {
        let mut status = Status::OK;

        if !self.exists() {
            return Status::failed(Status::NOT_EXIST);
        }

        let write_index = self.cursor().load(Ordering::Relaxed);
        let slot = self.slot_of(write_index);
        let mark = write_mark(write_index);
        let guard = self.guard(slot);

        guard.begin_write(mark, write_index);
        self.timestamp(slot).store(now_micros, Ordering::Relaxed);

        let len = if data.len() > self.buffer_size() {
            status |= Status::RANGE_EXCEEDED;
            self.buffer_size()
        } else {
            data.len()
        };
        unsafe {
            self.region
                .copy_in(self.layout.payload_offset(slot), &data[..len]);
        }

        guard.commit(mark);
        self.cursor().fetch_add(1, Ordering::Release);

        status
    }

    /// Read one slot into `out`.
    ///
    /// Copies `min(out.len(), buffer_size)` bytes. On failure the cursor is
    /// left untouched so the call can simply be retried, and the contents of
    /// `out` are unspecified.
    pub fn read(&self, cursor: &mut ReadCursor, mode: ReadMode, out: &mut [u8]) -> ReadOutcome {
        self.read_slot(cursor, mode, out, |ring, slot, out| ring.copy_payload(slot, out))
    }

    /// The read protocol with the payload copy supplied by `copy`, which runs
    /// between the guard snapshot and its validation.
    fn read_slot<C>(
        &self,
        cursor: &mut ReadCursor,
        mode: ReadMode,
        out: &mut [u8],
        copy: C,
    ) -> ReadOutcome
    where
        C: FnOnce(&Self, usize, &mut [u8]),
    {
        let mut status = Status::OK;
        let expected = cursor.position;
        let fail = |status: Status| ReadOutcome {
            status,
            position: expected,
            len: 0,
            timestamp_micros: None,
        };

        if !self.exists() {
            return fail(Status::failed(Status::NOT_EXIST));
        }

        let mode = if cursor.is_fresh() {
            ReadMode::Last
        } else {
            mode
        };

        let now = self.write_cursor();
        if now == expected {
            return fail(Status::failed(Status::NO_NEW_DATA));
        }

        let len = if out.len() > self.buffer_size() {
            status |= Status::RANGE_EXCEEDED;
            self.buffer_size()
        } else {
            out.len()
        };

        let logical = match mode {
            ReadMode::Next => {
                if now.wrapping_sub(expected) as usize > self.buffer_count() {
                    status |= Status::DATA_LOSS;
                    now.wrapping_sub(1)
                } else {
                    expected
                }
            }
            ReadMode::Last => now.wrapping_sub(1),
        };

        let slot = self.slot_of(logical);
        let guard = self.guard(slot);

        let before = guard.read_begin();
        if !before.is_stable() {
            status.fail(Status::WRITE_IN_PROGRESS);
            return fail(status);
        }

        let timestamp = self.timestamp(slot).load(Ordering::Relaxed);
        copy(self, slot, &mut out[..len]);

        if !guard.read_validate(before) {
            status.fail(Status::WRITE_IN_PROGRESS);
            return fail(status);
        }

        if guard.index() != logical {
            status.fail(Status::STALE_DATA);
            return fail(status);
        }

        if !self.exists() {
            status.fail(Status::NOT_EXIST);
            return fail(status);
        }

        cursor.position = match mode {
            ReadMode::Next => logical.wrapping_add(1),
            ReadMode::Last => now,
        };

        ReadOutcome {
            status,
            position: cursor.position,
            len,
            timestamp_micros: Some(timestamp),
        }
    }

    #[inline]
    fn copy_payload(&self, slot: usize, out: &mut [u8]) {
        // SAFETY: `out` is clamped to `buffer_size`, so the copy stays inside
        // the slot. A racing write is caught by the guard validation.
        unsafe {
            self.region
                .copy_out(self.layout.payload_offset(slot), out);
        }
    }

    #[inline]
    fn slot_of(&self, logical: u32) -> usize {
        logical as usize % self.buffer_count()
    }

    #[inline]
    fn exist_flag(&self) -> &AtomicBool {
        unsafe { self.region.get::<AtomicBool>(self.layout.offset(Field::ExistFlag)) }
    }

    #[inline]
    fn cursor(&self) -> &AtomicU32 {
        unsafe { self.region.get::<AtomicU32>(self.layout.offset(Field::WriteCursor)) }
    }

    #[inline]
    fn guard(&self, slot: usize) -> &SlotGuard {
        unsafe { self.region.get::<SlotGuard>(self.layout.guard_offset(slot)) }
    }

    #[inline]
    fn timestamp(&self, slot: usize) -> &AtomicU64 {
        unsafe { self.region.get::<AtomicU64>(self.layout.timestamp_offset(slot)) }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::region::HeapRegion;
    use alloc::vec;
    use alloc::vec::Vec;

    fn new_ring(buffer_size: usize, buffer_count: usize) -> (HeapRegion, BroadcastRing) {
        let size = RingLayout::calculate(buffer_size, buffer_count)
            .unwrap()
            .total_size();
        let heap = HeapRegion::new_zeroed(size);
        let ring = unsafe { BroadcastRing::init(heap.region(), buffer_size, buffer_count, 42) }
            .unwrap();
        (heap, ring)
    }

    fn read(
        ring: &BroadcastRing,
        cursor: &mut ReadCursor,
        mode: ReadMode,
    ) -> (ReadOutcome, Vec<u8>) {
        let mut out = vec![0u8; ring.buffer_size()];
        let outcome = ring.read(cursor, mode, &mut out);
        out.truncate(outcome.len);
        (outcome, out)
    }

    #[test]
    fn init_publishes_header() {
        let (heap, ring) = new_ring(64, 4);
        assert!(ring.exists());
        assert_eq!(ring.write_cursor(), FIRST_WRITE_INDEX);

        let attached = unsafe { BroadcastRing::attach(heap.region()) }.unwrap();
        assert_eq!(attached.buffer_size(), 64);
        assert_eq!(attached.buffer_count(), 4);
        assert_eq!(attached.layout(), ring.layout());
    }

    #[test]
    fn init_rejects_short_region() {
        let heap = HeapRegion::new_zeroed(64);
        let err = unsafe { BroadcastRing::init(heap.region(), 64, 4, 0) }.err();
        assert!(matches!(err, Some(LayoutError::RegionTooSmall { found: 64, .. })));
    }

    #[test]
    fn attach_rejects_removed_ring() {
        let (heap, ring) = new_ring(8, 2);
        ring.mark_removed();
        let err = unsafe { BroadcastRing::attach(heap.region()) }.err();
        assert_eq!(err, Some(AttachError::Removed));
    }

    #[test]
    fn attach_rejects_truncated_region() {
        let (heap, _ring) = new_ring(64, 4);
        let base = core::ptr::NonNull::new(heap.region().as_ptr()).unwrap();
        let short = unsafe { Region::from_raw(base, 100) };
        let err = unsafe { BroadcastRing::attach(short) }.err();
        assert!(matches!(
            err,
            Some(AttachError::Layout(LayoutError::RegionTooSmall { found: 100, .. }))
        ));
    }

    #[test]
    fn first_read_on_fresh_ring_sees_creation_slot() {
        let (_heap, ring) = new_ring(4, 2);
        let mut cursor = ReadCursor::new();
        let (outcome, data) = read(&ring, &mut cursor, ReadMode::Next);
        assert_eq!(outcome.status, Status::OK);
        assert_eq!(data, [0, 0, 0, 0]);
        assert_eq!(outcome.timestamp_micros, Some(42));
        assert_eq!(outcome.position, FIRST_WRITE_INDEX);
    }

    #[test]
    fn write_then_read_last_round_trips() {
        let (_heap, ring) = new_ring(64, 4);
        assert_eq!(ring.write(b"hello", 1_000), Status::OK);

        let mut cursor = ReadCursor::new();
        let mut out = [0u8; 5];
        let outcome = ring.read(&mut cursor, ReadMode::Last, &mut out);
        assert_eq!(outcome.status, Status::OK);
        assert_eq!(&out, b"hello");
        assert_eq!(outcome.len, 5);
        assert_eq!(outcome.timestamp_micros, Some(1_000));
        assert_eq!(outcome.position, 2);
    }

    #[test]
    fn oversized_write_is_truncated() {
        let (_heap, ring) = new_ring(4, 2);
        let status = ring.write(b"abcdefgh", 0);
        assert_eq!(status, Status::OK | Status::RANGE_EXCEEDED);

        let mut cursor = ReadCursor::new();
        let (outcome, data) = read(&ring, &mut cursor, ReadMode::Last);
        assert!(outcome.status.is_ok());
        assert_eq!(data, b"abcd");
    }

    #[test]
    fn oversized_output_buffer_is_clamped() {
        let (_heap, ring) = new_ring(4, 2);
        ring.write(b"wxyz", 0);

        let mut cursor = ReadCursor::new();
        let mut out = [0xffu8; 8];
        let outcome = ring.read(&mut cursor, ReadMode::Last, &mut out);
        assert_eq!(outcome.status, Status::OK | Status::RANGE_EXCEEDED);
        assert_eq!(outcome.len, 4);
        assert_eq!(&out[..4], b"wxyz");
        assert_eq!(&out[4..], [0xff; 4]);
    }

    #[test]
    fn second_read_without_write_reports_no_new_data() {
        let (_heap, ring) = new_ring(8, 4);
        ring.write(b"one", 0);

        for mode in [ReadMode::Next, ReadMode::Last] {
            let mut cursor = ReadCursor::new();
            assert!(read(&ring, &mut cursor, mode).0.status.is_ok());
            let (outcome, _) = read(&ring, &mut cursor, mode);
            assert_eq!(outcome.status, Status::ERROR | Status::NO_NEW_DATA);
            assert_eq!(outcome.position, 2);
        }
    }

    #[test]
    fn sequential_reader_sees_every_write_in_order() {
        let (_heap, ring) = new_ring(8, 3);
        let mut cursor = ReadCursor::new();
        // Catch up with the creation slot first.
        read(&ring, &mut cursor, ReadMode::Next);

        for i in 0u8..20 {
            ring.write(&[i; 8], 0);
            let (outcome, data) = read(&ring, &mut cursor, ReadMode::Next);
            assert_eq!(outcome.status, Status::OK, "write {i}");
            assert_eq!(data, [i; 8]);
        }
    }

    #[test]
    fn reader_within_capacity_drains_backlog_without_loss() {
        let (_heap, ring) = new_ring(1, 4);
        let mut cursor = ReadCursor::new();
        read(&ring, &mut cursor, ReadMode::Next);

        for i in 0u8..4 {
            ring.write(&[i], 0);
        }
        for i in 0u8..4 {
            let (outcome, data) = read(&ring, &mut cursor, ReadMode::Next);
            assert_eq!(outcome.status, Status::OK);
            assert_eq!(data, [i]);
        }
        let (outcome, _) = read(&ring, &mut cursor, ReadMode::Next);
        assert!(outcome.status.contains(Status::NO_NEW_DATA));
    }

    #[test]
    fn lagging_reader_reports_loss_and_jumps_to_newest() {
        let (_heap, ring) = new_ring(64, 4);
        ring.write(b"hello", 0);

        let mut cursor = ReadCursor::new();
        let mut out = [0u8; 5];
        assert!(ring.read(&mut cursor, ReadMode::Last, &mut out).status.is_ok());
        assert_eq!(&out, b"hello");

        for msg in [b"msg-1", b"msg-2", b"msg-3", b"msg-4", b"msg-5"] {
            ring.write(msg, 0);
        }

        let outcome = ring.read(&mut cursor, ReadMode::Next, &mut out);
        assert_eq!(outcome.status, Status::OK | Status::DATA_LOSS);
        assert_eq!(&out, b"msg-5");
        assert_eq!(outcome.position, ring.write_cursor());

        let outcome = ring.read(&mut cursor, ReadMode::Next, &mut out);
        assert!(outcome.status.contains(Status::NO_NEW_DATA));
    }

    #[test]
    fn read_last_skips_backlog() {
        let (_heap, ring) = new_ring(1, 8);
        let mut cursor = ReadCursor::new();
        read(&ring, &mut cursor, ReadMode::Last);
        for i in 0u8..5 {
            ring.write(&[i], 0);
        }
        let (outcome, data) = read(&ring, &mut cursor, ReadMode::Last);
        assert_eq!(outcome.status, Status::OK);
        assert_eq!(data, [4]);
        // Last leaves the cursor caught up with the writer.
        let (outcome, _) = read(&ring, &mut cursor, ReadMode::Next);
        assert!(outcome.status.contains(Status::NO_NEW_DATA));
    }

    #[test]
    fn open_write_on_target_slot_reports_write_in_progress() {
        let (_heap, ring) = new_ring(4, 2);
        ring.write(b"good", 0);

        // Simulate a writer stalled between prefix and postfix on slot 1.
        let slot = ring.slot_of(ring.write_cursor() - 1);
        ring.guard(slot).begin_write(write_mark(99), 99);

        let mut cursor = ReadCursor::new();
        let mut out = [0u8; 4];
        let outcome = ring.read(&mut cursor, ReadMode::Last, &mut out);
        assert_eq!(outcome.status, Status::ERROR | Status::WRITE_IN_PROGRESS);
        assert_eq!(outcome.len, 0);
        assert_eq!(out, [0; 4], "payload must not be copied");
        assert!(cursor.is_fresh(), "failed read must not move the cursor");
    }

    #[test]
    fn recycled_slot_reports_stale_data() {
        let (_heap, ring) = new_ring(4, 2);
        ring.write(b"aaaa", 0);

        // Stable guard, but carrying a different logical index than expected.
        let slot = ring.slot_of(ring.write_cursor() - 1);
        let guard = ring.guard(slot);
        guard.begin_write(write_mark(7), 7);
        guard.commit(write_mark(7));

        let mut cursor = ReadCursor::new();
        let (outcome, _) = read(&ring, &mut cursor, ReadMode::Last);
        assert_eq!(outcome.status, Status::ERROR | Status::STALE_DATA);
    }

    #[test]
    fn removed_ring_fails_reads_and_writes() {
        let (_heap, ring) = new_ring(4, 2);
        ring.write(b"data", 0);
        ring.mark_removed();

        assert_eq!(ring.write(b"more", 0), Status::ERROR | Status::NOT_EXIST);
        let mut cursor = ReadCursor::new();
        let (outcome, _) = read(&ring, &mut cursor, ReadMode::Last);
        assert_eq!(outcome.status, Status::ERROR | Status::NOT_EXIST);
    }

    #[test]
    fn removal_during_copy_reports_not_exist() {
        let (_heap, ring) = new_ring(4, 2);
        ring.write(b"data", 0);

        let mut cursor = ReadCursor::new();
        let mut out = [0u8; 4];
        let outcome = ring.read_slot(&mut cursor, ReadMode::Last, &mut out, |ring, slot, out| {
            ring.copy_payload(slot, out);
            ring.mark_removed();
        });
        assert_eq!(outcome.status, Status::ERROR | Status::NOT_EXIST);
        assert_eq!(outcome.timestamp_micros, None);
        assert!(cursor.is_fresh());
    }

    #[test]
    fn write_during_copy_reports_write_in_progress() {
        let (_heap, ring) = new_ring(4, 1);
        ring.write(b"old!", 0);

        let mut cursor = ReadCursor::new();
        let mut out = [0u8; 4];
        let outcome = ring.read_slot(&mut cursor, ReadMode::Last, &mut out, |ring, slot, out| {
            ring.copy_payload(slot, out);
            // A single slot: the next write lands on the one being read.
            ring.write(b"new!", 0);
        });
        assert_eq!(outcome.status, Status::ERROR | Status::WRITE_IN_PROGRESS);
        assert!(cursor.is_fresh());
    }

    #[test]
    fn readers_do_not_share_cursors() {
        let (_heap, ring) = new_ring(2, 4);
        ring.write(b"a1", 0);

        let mut first = ReadCursor::new();
        let mut second = ReadCursor::new();
        assert!(read(&ring, &mut first, ReadMode::Next).0.status.is_ok());
        assert!(read(&ring, &mut first, ReadMode::Next).0.status.is_err());

        let (outcome, data) = read(&ring, &mut second, ReadMode::Next);
        assert!(outcome.status.is_ok());
        assert_eq!(data, b"a1");
    }

    #[test]
    fn reset_cursor_rereads_newest_slot() {
        let (_heap, ring) = new_ring(2, 4);
        ring.write(b"zz", 0);
        let mut cursor = ReadCursor::new();
        read(&ring, &mut cursor, ReadMode::Next);
        assert!(read(&ring, &mut cursor, ReadMode::Next).0.status.is_err());

        cursor.reset();
        let (outcome, data) = read(&ring, &mut cursor, ReadMode::Next);
        assert!(outcome.status.is_ok());
        assert_eq!(data, b"zz");
    }
}
