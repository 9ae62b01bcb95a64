use core::mem::{align_of, size_of};
use core::ptr::{self, NonNull};

/// A contiguous byte region addressed by offset.
///
/// `Region` is a borrowed view: it does not own the memory it points at. For a
/// ring shared between processes the memory comes from an `mmap` of a shared
/// memory object; in tests it comes from a [`HeapRegion`].
///
/// # Safety
///
/// The caller must ensure:
/// - `base` is valid for `len` bytes and aligned to at least 8 bytes
/// - the memory remains valid for the lifetime of this Region
#[derive(Clone, Copy)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Create a region from a raw pointer and length.
    ///
    /// # Safety
    ///
    /// - `base` must be non-null and valid for `len` bytes
    /// - `base` must be aligned to at least 8 bytes
    /// - the memory must remain valid for the lifetime of this Region
    pub unsafe fn from_raw(base: NonNull<u8>, len: usize) -> Self {
        debug_assert!(base.as_ptr().align_offset(8) == 0, "region base must be 8-byte aligned");
        Self { base, len }
    }

    /// Returns the base pointer of the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Returns the size of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the region has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if `len` bytes starting at `off` lie inside the region.
    #[inline]
    pub fn contains(&self, off: usize, len: usize) -> bool {
        off.checked_add(len).is_some_and(|end| end <= self.len)
    }

    /// Returns a pointer to offset `off` within the region.
    #[inline]
    pub fn offset(&self, off: usize) -> *mut u8 {
        assert!(
            off < self.len,
            "offset {off} out of bounds (len={})",
            self.len
        );
        unsafe { self.as_ptr().add(off) }
    }

    /// Returns a reference to a `T` at the given byte offset.
    ///
    /// # Safety
    ///
    /// The offset must be aligned for `T` and `T` must fit inside the region.
    #[inline]
    pub unsafe fn get<T>(&self, off: usize) -> &T {
        debug_assert!(self.contains(off, size_of::<T>()));
        debug_assert!(off.is_multiple_of(align_of::<T>()));
        unsafe { &*(self.offset(off) as *const T) }
    }

    /// Returns a mutable reference to a `T` at the given byte offset.
    ///
    /// # Safety
    ///
    /// The offset must be aligned for `T`, `T` must fit inside the region, and
    /// no other reference to those bytes may be live.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self, off: usize) -> &mut T {
        debug_assert!(self.contains(off, size_of::<T>()));
        debug_assert!(off.is_multiple_of(align_of::<T>()));
        unsafe { &mut *(self.offset(off) as *mut T) }
    }

    /// Reads a `T` at a byte offset that may not be aligned for `T`.
    ///
    /// # Safety
    ///
    /// `T` must fit inside the region and be valid for any bit pattern.
    #[inline]
    pub unsafe fn read_unaligned<T: Copy>(&self, off: usize) -> T {
        debug_assert!(self.contains(off, size_of::<T>()));
        unsafe { ptr::read_unaligned(self.offset(off) as *const T) }
    }

    /// Writes a `T` at a byte offset that may not be aligned for `T`.
    ///
    /// # Safety
    ///
    /// `T` must fit inside the region and nothing may be reading those bytes.
    #[inline]
    pub unsafe fn write_unaligned<T: Copy>(&self, off: usize, value: T) {
        debug_assert!(self.contains(off, size_of::<T>()));
        unsafe { ptr::write_unaligned(self.offset(off) as *mut T, value) }
    }

    /// Copies `src` into the region starting at `off`.
    ///
    /// # Safety
    ///
    /// `src.len()` bytes starting at `off` must lie inside the region. Readers
    /// racing with this copy must detect the overlap on their own.
    #[inline]
    pub unsafe fn copy_in(&self, off: usize, src: &[u8]) {
        debug_assert!(self.contains(off, src.len()));
        if src.is_empty() {
            return;
        }
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.offset(off), src.len()) }
    }

    /// Copies bytes starting at `off` out of the region into `dst`.
    ///
    /// # Safety
    ///
    /// `dst.len()` bytes starting at `off` must lie inside the region. If a
    /// writer may be racing, the caller must validate the copy afterwards.
    #[inline]
    pub unsafe fn copy_out(&self, off: usize, dst: &mut [u8]) {
        debug_assert!(self.contains(off, dst.len()));
        if dst.is_empty() {
            return;
        }
        unsafe { ptr::copy_nonoverlapping(self.offset(off), dst.as_mut_ptr(), dst.len()) }
    }
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}

#[cfg(any(test, feature = "alloc"))]
mod heap {
    use super::Region;
    use alloc::alloc::{Layout, alloc_zeroed, dealloc};
    use core::ptr::NonNull;

    /// Heap-backed region, zero-filled like a freshly truncated shm object.
    pub struct HeapRegion {
        base: NonNull<u8>,
        len: usize,
        layout: Layout,
    }

    impl HeapRegion {
        /// Allocate a zeroed heap region aligned to 64 bytes.
        pub fn new_zeroed(size: usize) -> Self {
            let layout =
                Layout::from_size_align(size.max(1), 64).expect("invalid heap region layout");
            let ptr = unsafe { alloc_zeroed(layout) };
            let base = NonNull::new(ptr).expect("heap region allocation failed");
            Self {
                base,
                len: size,
                layout,
            }
        }

        /// Returns a Region view of this allocation.
        #[inline]
        pub fn region(&self) -> Region {
            unsafe { Region::from_raw(self.base, self.len) }
        }

        /// Returns the allocation size.
        #[inline]
        pub fn len(&self) -> usize {
            self.len
        }

        /// Returns true if the allocation is zero-length.
        #[inline]
        pub fn is_empty(&self) -> bool {
            self.len == 0
        }
    }

    impl Drop for HeapRegion {
        fn drop(&mut self) {
            unsafe { dealloc(self.base.as_ptr(), self.layout) };
        }
    }

    unsafe impl Send for HeapRegion {}
    unsafe impl Sync for HeapRegion {}
}

#[cfg(any(test, feature = "alloc"))]
pub use heap::HeapRegion;
