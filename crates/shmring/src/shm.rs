//! The per-process ring handle.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use shmring_primitives::{
    ATOMICS_LOCK_FREE, BroadcastRing, ReadCursor, ReadMode, ReadOutcome, RingLayout, Status,
};
use tracing::{debug, trace, warn};

use crate::chrono::Chronometry;
use crate::config::{AccessMode, OpenOption, ShmConfig};
use crate::error::ShmError;
use crate::posix::{self, ShmMapping, ShmName};

struct Attached {
    ring: BroadcastRing,
    // Must outlive `ring`, which points into it.
    mapping: ShmMapping,
}

/// A handle on a named shared memory ring.
///
/// The creating handle owns the region and should eventually [`remove`] it;
/// every other handle only attaches. Each handle carries its own read cursor,
/// status and chronometry, so several handles on the same ring, in one
/// process or many, read independently.
///
/// Only one handle may write to a ring at a time.
///
/// [`remove`]: Shm::remove
pub struct Shm {
    name: ShmName,
    mode: AccessMode,
    attached: Option<Attached>,
    layout: RingLayout,
    cursor: ReadCursor,
    status: Status,
    last_read_time: u64,
    scratch: Vec<u8>,
    chrono: Chronometry,
}

static_assertions::assert_impl_all!(Shm: Send, Sync);

impl Shm {
    /// Obtain a ring handle as selected by `option`.
    ///
    /// Geometry from `config` is used only if a region gets created.
    pub fn new(option: OpenOption, id: &str, config: &ShmConfig) -> Result<Self, ShmError> {
        if !ATOMICS_LOCK_FREE {
            return Err(ShmError::AtomicsNotLockFree);
        }
        let name = ShmName::new(id)?;

        match option {
            OpenOption::Create => Self::create_named(name, config),
            OpenOption::Open => Self::open_named(name, config.mode),
            OpenOption::CreateOrOpen => {
                if posix::exists(&name) {
                    Self::open_named(name, config.mode)
                } else {
                    Self::create_named(name, config)
                }
            }
        }
    }

    /// Create a new ring; fails if `id` is taken.
    pub fn create(id: &str, config: &ShmConfig) -> Result<Self, ShmError> {
        Self::new(OpenOption::Create, id, config)
    }

    /// Attach to an existing ring.
    pub fn open(id: &str) -> Result<Self, ShmError> {
        Self::new(OpenOption::Open, id, &ShmConfig::default())
    }

    /// Attach to `id` if it exists, create it otherwise.
    pub fn create_or_open(id: &str, config: &ShmConfig) -> Result<Self, ShmError> {
        Self::new(OpenOption::CreateOrOpen, id, config)
    }

    fn create_named(name: ShmName, config: &ShmConfig) -> Result<Self, ShmError> {
        let (buffer_size, buffer_count) = (config.buffer_size, config.buffer_count);
        if buffer_size == 0 || buffer_count == 0 {
            return Err(ShmError::InvalidGeometry {
                buffer_size,
                buffer_count,
            });
        }
        let layout =
            RingLayout::calculate(buffer_size, buffer_count).map_err(|source| ShmError::Layout {
                name: name.to_string(),
                source,
            })?;

        let mapping = ShmMapping::create(&name, layout.total_size())?;
        // SAFETY: the object was created exclusively above, so nobody else
        // maps it yet, and `mapping` is stored next to the ring.
        let ring = unsafe {
            BroadcastRing::init(mapping.region(), buffer_size, buffer_count, now_micros())
        };
        let ring = match ring {
            Ok(ring) => ring,
            Err(source) => {
                drop(mapping);
                if let Err(e) = posix::unlink(&name) {
                    warn!(name = %name, error = %e, "failed to unlink after init failure");
                }
                return Err(ShmError::Layout {
                    name: name.to_string(),
                    source,
                });
            }
        };

        debug!(
            name = %name,
            buffer_size,
            buffer_count,
            total_size = layout.total_size(),
            "created ring"
        );
        Ok(Self::from_parts(name, config.mode, Attached { ring, mapping }))
    }

    fn open_named(name: ShmName, mode: AccessMode) -> Result<Self, ShmError> {
        let mapping = ShmMapping::open(&name)?;
        // SAFETY: `mapping` is stored next to the ring and outlives it.
        let ring = unsafe { BroadcastRing::attach(mapping.region()) }
            .map_err(|e| ShmError::attach(name.as_str(), e))?;

        debug!(
            name = %name,
            buffer_size = ring.buffer_size(),
            buffer_count = ring.buffer_count(),
            mapped = mapping.len(),
            "attached to ring"
        );
        Ok(Self::from_parts(name, mode, Attached { ring, mapping }))
    }

    fn from_parts(name: ShmName, mode: AccessMode, attached: Attached) -> Self {
        let layout = *attached.ring.layout();
        Self {
            name,
            mode,
            layout,
            scratch: vec![0; layout.buffer_size()],
            attached: Some(attached),
            cursor: ReadCursor::new(),
            status: Status::OK,
            last_read_time: 0,
            chrono: Chronometry::default(),
        }
    }

    /// Write one message. Data beyond `buffer_size` is dropped and flagged
    /// with [`Status::RANGE_EXCEEDED`].
    pub fn write(&mut self, data: &[u8]) -> Status {
        let Some(attached) = &self.attached else {
            self.status = Status::failed(Status::NOT_EXIST);
            return self.status;
        };

        let start = self.chrono.start();
        self.status = attached.ring.write(data, now_micros());
        if self.status.is_ok() {
            self.chrono.finish_write(start);
        }
        self.status
    }

    /// Read one message into `out` and return the read cursor.
    ///
    /// On success the first `min(out.len(), buffer_size)` bytes of `out` hold
    /// the slot's payload. On failure `out` is left untouched; check
    /// [`status`](Self::status).
    pub fn read(&mut self, mode: ReadMode, out: &mut [u8]) -> u32 {
        let start = self.chrono.start();
        let outcome = self.read_scratch(mode, out.len());
        if outcome.status.is_ok() {
            out[..outcome.len].copy_from_slice(&self.scratch[..outcome.len]);
            self.chrono.finish_read(start);
        }
        self.cursor.position()
    }

    /// Read up to `len` bytes of one message and hand the validated copy to
    /// `f`. `f` is not called if the read fails. Returns the read cursor.
    pub fn read_with<F>(&mut self, mode: ReadMode, len: usize, f: F) -> u32
    where
        F: FnOnce(&[u8]),
    {
        let start = self.chrono.start();
        let outcome = self.read_scratch(mode, len);
        if outcome.status.is_ok() {
            f(&self.scratch[..outcome.len]);
            self.chrono.finish_read(start);
        }
        self.cursor.position()
    }

    fn read_scratch(&mut self, mode: ReadMode, len: usize) -> ReadOutcome {
        let Some(attached) = &self.attached else {
            self.status = Status::failed(Status::NOT_EXIST);
            return ReadOutcome {
                status: self.status,
                position: self.cursor.position(),
                len: 0,
                timestamp_micros: None,
            };
        };

        let want = len.min(self.scratch.len());
        let mut outcome = attached
            .ring
            .read(&mut self.cursor, mode, &mut self.scratch[..want]);
        // The ring clamps after its existence and no-new-data checks; only
        // reads that got that far report the oversized request.
        if len > want && !outcome.status.intersects(Status::NOT_EXIST | Status::NO_NEW_DATA) {
            outcome.status |= Status::RANGE_EXCEEDED;
        }

        if outcome.status.contains(Status::DATA_LOSS) {
            trace!(
                name = %self.name,
                position = outcome.position,
                "reader lapped by writer, resynchronized to newest slot"
            );
        }
        if let Some(timestamp) = outcome.timestamp_micros {
            self.last_read_time = timestamp;
        }
        self.status = outcome.status;
        outcome
    }

    /// Forget the read position; the next read returns the newest message.
    pub fn read_reset(&mut self) {
        self.cursor.reset();
    }

    /// Unmap the region. Calling it again is a no-op.
    ///
    /// The handle counts as closed even if unmapping fails.
    pub fn close(&mut self) -> Result<(), ShmError> {
        self.status = Status::OK;
        let Some(Attached { ring, mapping }) = self.attached.take() else {
            return Ok(());
        };
        drop(ring);

        if let Err(e) = mapping.unmap(&self.name) {
            self.status = e.status();
            return Err(e);
        }
        debug!(name = %self.name, "closed ring");
        Ok(())
    }

    /// Mark the ring as removed for every attached reader, unmap it and
    /// unlink its name.
    pub fn remove(&mut self) -> Result<(), ShmError> {
        if let Some(attached) = &self.attached {
            attached.ring.mark_removed();
        }
        self.close()?;

        let result = posix::unlink(&self.name);
        self.status = match &result {
            Ok(()) => {
                debug!(name = %self.name, "removed ring");
                Status::OK
            }
            Err(e) => e.status(),
        };
        result
    }

    /// Unlink the ring named `id` without mapping it. Handles that are still
    /// attached keep working.
    pub fn unlink(id: &str) -> Result<(), ShmError> {
        posix::unlink(&ShmName::new(id)?)
    }

    /// True if a ring named `id` exists.
    pub fn exists(id: &str) -> bool {
        ShmName::new(id).is_ok_and(|name| posix::exists(&name))
    }

    /// True if this handle's ring still exists by name.
    pub fn check(&self) -> bool {
        posix::exists(&self.name)
    }

    /// Outcome of the last call on this handle.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Write time, in microseconds since the Unix epoch, of the last message
    /// read successfully. Zero before the first successful read.
    pub fn last_read_time(&self) -> u64 {
        self.last_read_time
    }

    /// Backing object name, including the leading slash.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.attached.is_some()
    }

    /// Size of the whole region in bytes.
    pub fn total_size(&self) -> usize {
        self.layout.total_size()
    }

    /// Bytes occupied by payload slots.
    pub fn region_size(&self) -> usize {
        self.layout.payload_region_size()
    }

    pub fn buffer_size(&self) -> usize {
        self.layout.buffer_size()
    }

    pub fn buffer_count(&self) -> usize {
        self.layout.buffer_count()
    }

    /// Logical number of the next write, or `None` once closed.
    pub fn write_cursor(&self) -> Option<u32> {
        self.attached.as_ref().map(|a| a.ring.write_cursor())
    }

    /// This handle's read cursor.
    pub fn read_cursor(&self) -> u32 {
        self.cursor.position()
    }

    pub fn set_chronometry(&mut self, enabled: bool) {
        self.chrono.set_enabled(enabled);
    }

    pub fn chronometry_enabled(&self) -> bool {
        self.chrono.is_enabled()
    }

    pub fn reset_chronometry(&mut self) {
        self.chrono.reset();
    }

    pub fn min_write_time(&self) -> Option<Duration> {
        self.chrono.write().min()
    }

    pub fn max_write_time(&self) -> Option<Duration> {
        self.chrono.write().max()
    }

    pub fn min_read_time(&self) -> Option<Duration> {
        self.chrono.read().min()
    }

    pub fn max_read_time(&self) -> Option<Duration> {
        self.chrono.read().max()
    }
}

impl std::fmt::Debug for Shm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shm")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .field("buffer_size", &self.buffer_size())
            .field("buffer_count", &self.buffer_count())
            .field("cursor", &self.cursor.position())
            .field("status", &self.status)
            .finish()
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unique_id(tag: &str) -> String {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        format!(
            "shmring-unit-{tag}-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    struct Cleanup(String);

    impl Drop for Cleanup {
        fn drop(&mut self) {
            let _ = Shm::unlink(&self.0);
        }
    }

    #[test]
    fn zero_geometry_fails_before_touching_the_os() {
        let id = unique_id("zero");
        let err = Shm::create(&id, &ShmConfig::new(0, 4)).unwrap_err();
        assert!(matches!(err, ShmError::InvalidGeometry { .. }));
        assert_eq!(err.status(), Status::ERROR | Status::RANGE_EXCEEDED);
        assert!(!Shm::exists(&id));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let err = Shm::open("a/b").unwrap_err();
        assert!(matches!(err, ShmError::InvalidName { .. }));
        assert!(!Shm::exists(""));
    }

    #[test]
    fn read_failure_leaves_output_untouched() {
        let id = unique_id("untouched");
        let _cleanup = Cleanup(id.clone());
        let mut shm = Shm::create(&id, &ShmConfig::new(8, 2)).unwrap();

        shm.write(b"one");
        let mut out = [0u8; 3];
        shm.read(ReadMode::Last, &mut out);
        assert_eq!(&out, b"one");

        let mut out = *b"keep";
        shm.read(ReadMode::Next, &mut out);
        assert_eq!(shm.status(), Status::ERROR | Status::NO_NEW_DATA);
        assert_eq!(&out, b"keep");
    }

    #[test]
    fn read_with_reports_oversized_request() {
        let id = unique_id("read-with");
        let _cleanup = Cleanup(id.clone());
        let mut shm = Shm::create(&id, &ShmConfig::new(4, 2)).unwrap();

        shm.write(b"abcd");
        let mut seen = Vec::new();
        shm.read_with(ReadMode::Last, 16, |bytes| seen.extend_from_slice(bytes));
        assert_eq!(seen, b"abcd");
        assert!(shm.status().is_ok());
        assert!(shm.status().contains(Status::RANGE_EXCEEDED));
        assert!(shm.last_read_time() > 0);
    }

    #[test]
    fn oversized_request_is_not_flagged_on_early_failures() {
        let id = unique_id("early-fail");
        let _cleanup = Cleanup(id.clone());
        let mut shm = Shm::create(&id, &ShmConfig::new(4, 2)).unwrap();
        shm.write(b"abcd");

        let mut out = [0u8; 16];
        shm.read(ReadMode::Last, &mut out);
        assert_eq!(shm.status(), Status::OK | Status::RANGE_EXCEEDED);

        shm.read(ReadMode::Last, &mut out);
        assert_eq!(shm.status(), Status::ERROR | Status::NO_NEW_DATA);

        let mut seen = false;
        shm.read_with(ReadMode::Next, 16, |_| seen = true);
        assert_eq!(shm.status(), Status::ERROR | Status::NO_NEW_DATA);
        assert!(!seen);

        let mut reader = Shm::open(&id).unwrap();
        shm.remove().unwrap();
        reader.read(ReadMode::Last, &mut out);
        assert_eq!(reader.status(), Status::ERROR | Status::NOT_EXIST);

        shm.read(ReadMode::Last, &mut out);
        assert_eq!(shm.status(), Status::ERROR | Status::NOT_EXIST);
    }

    #[test]
    fn close_unmaps_and_reports_ok() {
        let id = unique_id("close");
        let _cleanup = Cleanup(id.clone());
        let mut shm = Shm::create(&id, &ShmConfig::new(4, 2)).unwrap();
        shm.write(b"xx");

        shm.close().unwrap();
        assert_eq!(shm.status(), Status::OK);
        assert!(!shm.is_open());
        // The object itself outlives the mapping.
        assert!(shm.check());
    }

    #[test]
    fn closed_handle_reports_not_exist() {
        let id = unique_id("closed");
        let _cleanup = Cleanup(id.clone());
        let mut shm = Shm::create(&id, &ShmConfig::new(4, 2)).unwrap();

        shm.close().unwrap();
        shm.close().unwrap();
        assert!(!shm.is_open());
        assert_eq!(shm.write_cursor(), None);
        assert_eq!(shm.write(b"x"), Status::ERROR | Status::NOT_EXIST);

        let mut called = false;
        shm.read_with(ReadMode::Last, 4, |_| called = true);
        assert!(!called);
        assert_eq!(shm.status(), Status::ERROR | Status::NOT_EXIST);

        // Geometry survives for reporting.
        assert_eq!(shm.buffer_size(), 4);
        assert_eq!(shm.region_size(), 8);
    }

    #[test]
    fn chronometry_records_successful_calls_only() {
        let id = unique_id("chrono");
        let _cleanup = Cleanup(id.clone());
        let mut shm = Shm::create(&id, &ShmConfig::new(4, 2)).unwrap();

        shm.write(b"untimed");
        assert_eq!(shm.max_write_time(), None);

        shm.set_chronometry(true);
        shm.write(b"x");
        let mut out = [0u8; 4];
        shm.read(ReadMode::Last, &mut out);
        shm.read(ReadMode::Next, &mut out);
        assert!(shm.status().contains(Status::NO_NEW_DATA));

        let (min, max) = (shm.min_write_time().unwrap(), shm.max_write_time().unwrap());
        assert!(min <= max);
        assert!(shm.max_read_time().is_some());

        shm.reset_chronometry();
        assert_eq!(shm.min_read_time(), None);
        assert!(shm.chronometry_enabled());
    }
}
