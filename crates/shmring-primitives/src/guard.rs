use crate::sync::{AtomicU8, AtomicU32, Ordering, fence};

/// Marker value of a slot that has never been written.
pub const UNWRITTEN_MARK: u8 = 0;

/// Number of distinct write markers. Markers cycle through `1..=MARK_PERIOD`.
pub const MARK_PERIOD: u32 = 127;

/// Write marker for logical write number `write_index`. Never returns
/// [`UNWRITTEN_MARK`].
#[inline]
pub fn write_mark(write_index: u32) -> u8 {
    1 + (write_index % MARK_PERIOD) as u8
}

/// Per-slot guard bracketing a payload write (8 bytes).
///
/// The writer stores the marker into `prefix` before touching the payload and
/// into `postfix` after it. While the two differ a write is in progress.
/// `index` holds the logical write number the slot currently carries.
#[repr(C)]
pub struct SlotGuard {
    pub prefix: AtomicU8,
    pub postfix: AtomicU8,
    _pad: [u8; 2],
    pub index: AtomicU32,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<SlotGuard>() == crate::layout::GUARD_SIZE);

/// Prefix/postfix pair observed at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardSnapshot {
    pub prefix: u8,
    pub postfix: u8,
}

impl GuardSnapshot {
    /// True when no write was in progress at the time of the snapshot.
    #[inline]
    pub fn is_stable(self) -> bool {
        self.prefix == self.postfix
    }
}

impl SlotGuard {
    /// A guard in the never-written state, for use outside a region.
    pub fn new() -> Self {
        Self {
            prefix: AtomicU8::new(UNWRITTEN_MARK),
            postfix: AtomicU8::new(UNWRITTEN_MARK),
            _pad: [0; 2],
            index: AtomicU32::new(0),
        }
    }

    /// Reset to the never-written state.
    pub fn init(&mut self) {
        self.prefix = AtomicU8::new(UNWRITTEN_MARK);
        self.postfix = AtomicU8::new(UNWRITTEN_MARK);
        self._pad = [0; 2];
        self.index = AtomicU32::new(0);
    }

    /// Announce a write of logical number `index` tagged with `mark`.
    ///
    /// Every payload and timestamp store the writer makes afterwards is
    /// ordered after the new prefix by the release fence.
    #[inline]
    pub fn begin_write(&self, mark: u8, index: u32) {
        self.prefix.store(mark, Ordering::Relaxed);
        self.index.store(index, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Close the write opened by [`begin_write`](Self::begin_write).
    #[inline]
    pub fn commit(&self, mark: u8) {
        self.postfix.store(mark, Ordering::Release);
    }

    /// Snapshot taken before copying the payload out.
    ///
    /// `postfix` is loaded first: seeing a committed postfix makes the payload
    /// of that write visible, and the prefix loaded after it tells whether a
    /// newer write has started since.
    #[inline]
    pub fn read_begin(&self) -> GuardSnapshot {
        let postfix = self.postfix.load(Ordering::Acquire);
        let prefix = self.prefix.load(Ordering::Acquire);
        GuardSnapshot { prefix, postfix }
    }

    /// Returns true if no write overlapped the copy that followed `before`.
    ///
    /// The acquire fence keeps the payload loads ahead of the guard re-check,
    /// so any payload byte taken from a newer write implies the newer prefix is
    /// observed here.
    #[inline]
    pub fn read_validate(&self, before: GuardSnapshot) -> bool {
        fence(Ordering::Acquire);
        let prefix = self.prefix.load(Ordering::Relaxed);
        let postfix = self.postfix.load(Ordering::Relaxed);
        before.is_stable() && prefix == before.prefix && postfix == before.postfix
    }

    /// Logical write number the slot currently carries.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index.load(Ordering::Relaxed)
    }
}

impl Default for SlotGuard {
    fn default() -> Self {
        Self::new()
    }
}
