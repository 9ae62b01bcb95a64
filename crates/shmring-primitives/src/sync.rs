#[cfg(not(feature = "loom"))]
pub use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering, fence};
#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering, fence};

#[cfg(feature = "loom")]
pub use loom::thread;
#[cfg(all(not(feature = "loom"), any(test, feature = "std")))]
pub use std::thread;

/// Whether every atomic width the ring protocol touches is natively lock-free.
///
/// Rust only exposes an atomic type on targets where it is backed by real
/// hardware instructions, so this reduces to checking that the widths exist.
/// A region shared between processes must never rely on an emulated atomic:
/// the emulation lock would live in one process's private memory.
pub const ATOMICS_LOCK_FREE: bool = cfg!(all(
    target_has_atomic = "8",
    target_has_atomic = "32",
    target_has_atomic = "64"
));
