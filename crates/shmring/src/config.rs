//! Construction options for a ring handle.

/// Default size of one slot in bytes (4KB).
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default number of slots.
pub const DEFAULT_BUFFER_COUNT: usize = 64;

bitflags::bitflags! {
    /// Access the caller intends to perform on the ring.
    ///
    /// Recorded on the handle and reported back, but not enforced: a handle
    /// opened with `READ` alone can still write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl Default for AccessMode {
    fn default() -> Self {
        AccessMode::READ | AccessMode::WRITE
    }
}

/// How a handle obtains its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOption {
    /// Create a new region; fail if the name is taken.
    Create,
    /// Attach to an existing region; fail if there is none.
    Open,
    /// Probe for the name, then create or attach.
    ///
    /// The probe and the following create/attach are not atomic: another
    /// process can create the region in between, in which case the create
    /// fails with [`ShmError::AlreadyExists`](crate::ShmError::AlreadyExists).
    CreateOrOpen,
}

/// Configuration for creating a ring.
///
/// Geometry is only consulted when a region is created. Attaching reads it
/// from the region header instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmConfig {
    /// Bytes per slot.
    pub buffer_size: usize,
    /// Number of slots.
    pub buffer_count: usize,
    /// Intended access.
    pub mode: AccessMode,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
            mode: AccessMode::default(),
        }
    }
}

impl ShmConfig {
    pub fn new(buffer_size: usize, buffer_count: usize) -> Self {
        Self {
            buffer_size,
            buffer_count,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }
}
