//! Named POSIX shared memory objects and their mappings.

use std::ffi::CString;
use std::fs::{File, Permissions};
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::ptr::NonNull;

use shmring_primitives::Region;
use tracing::warn;

use crate::error::ShmError;

/// Longest identifier kept in an object name (`NAME_MAX` minus the leading
/// slash and the terminating NUL).
pub const MAX_NAME_LEN: usize = 253;

/// Mode bits of a newly created object.
pub const DEFAULT_PERMISSIONS: u32 = 0o666;

/// Backing object name derived from a caller identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShmName {
    name: String,
}

impl ShmName {
    /// `"/"` followed by `id`, truncated to [`MAX_NAME_LEN`] bytes on a char
    /// boundary.
    pub fn new(id: &str) -> Result<Self, ShmError> {
        let invalid = |reason| ShmError::InvalidName {
            name: id.to_owned(),
            reason,
        };
        if id.is_empty() {
            return Err(invalid("identifier is empty"));
        }
        if id.contains('/') {
            return Err(invalid("identifier contains '/'"));
        }
        if id.contains('\0') {
            return Err(invalid("identifier contains NUL"));
        }

        let mut end = id.len().min(MAX_NAME_LEN);
        while !id.is_char_boundary(end) {
            end -= 1;
        }

        let mut name = String::with_capacity(end + 1);
        name.push('/');
        name.push_str(&id[..end]);
        Ok(Self { name })
    }

    /// Full object name, including the leading slash.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Identifier part, without the leading slash.
    pub fn id(&self) -> &str {
        &self.name[1..]
    }

    fn to_cstring(&self) -> CString {
        // Validated in `new`: no interior NUL.
        CString::new(self.name.as_bytes()).unwrap_or_default()
    }
}

impl std::fmt::Display for ShmName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A shared, read-write mapping of a whole shared memory object.
pub struct ShmMapping {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain shared memory; all concurrent access to it goes
// through atomics or guard-validated copies.
unsafe impl Send for ShmMapping {}
unsafe impl Sync for ShmMapping {}

impl ShmMapping {
    /// Create the object exclusively, size it to `len` bytes and map it.
    ///
    /// The object is zero-filled. If anything fails after the object was
    /// created it is unlinked again.
    pub fn create(name: &ShmName, len: usize) -> Result<Self, ShmError> {
        let file = shm_open(
            name,
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            DEFAULT_PERMISSIONS as libc::mode_t,
        )
        .map_err(|e| match e.raw_os_error() {
            Some(libc::EEXIST) => ShmError::AlreadyExists {
                name: name.to_string(),
            },
            _ => ShmError::os("shm_open", name.as_str(), e),
        })?;

        let mapped = Self::size_and_map(name, &file, len);
        if mapped.is_err() {
            if let Err(e) = unlink(name) {
                warn!(name = %name, error = %e, "failed to unlink after create failure");
            }
        }
        mapped
    }

    fn size_and_map(name: &ShmName, file: &File, len: usize) -> Result<Self, ShmError> {
        // The umask narrows the mode passed to shm_open.
        file.set_permissions(Permissions::from_mode(DEFAULT_PERMISSIONS))
            .map_err(|e| ShmError::os("fchmod", name.as_str(), e))?;
        file.set_len(len as u64)
            .map_err(|e| ShmError::os("ftruncate", name.as_str(), e))?;
        map(name, file, len)
    }

    /// Map an existing object in full.
    pub fn open(name: &ShmName) -> Result<Self, ShmError> {
        let file = shm_open(name, libc::O_RDWR, 0).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOENT) => ShmError::NotFound {
                name: name.to_string(),
            },
            _ => ShmError::os("shm_open", name.as_str(), e),
        })?;

        let len = file
            .metadata()
            .map_err(|e| ShmError::os("fstat", name.as_str(), e))?
            .len();
        let len = usize::try_from(len).map_err(|_| {
            ShmError::os(
                "fstat",
                name.as_str(),
                io::Error::new(io::ErrorKind::InvalidData, "object larger than address space"),
            )
        })?;
        map(name, &file, len)
    }

    /// The mapping as a [`Region`].
    pub fn region(&self) -> Region {
        // SAFETY: mmap returns page-aligned memory valid for `len` bytes, and
        // it stays mapped until `self` is dropped.
        unsafe { Region::from_raw(self.base, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ShmMapping {
    /// Unmap explicitly, reporting failure instead of logging it.
    pub fn unmap(self, name: &ShmName) -> Result<(), ShmError> {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: base and len describe a mapping created by `map`, and
        // `ManuallyDrop` keeps `Drop` from unmapping it a second time.
        let rc = unsafe { libc::munmap(this.base.as_ptr().cast(), this.len) };
        if rc != 0 {
            return Err(ShmError::os("munmap", name.as_str(), io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for ShmMapping {
    fn drop(&mut self) {
        // SAFETY: base and len describe a mapping created by `map`.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        if rc != 0 {
            warn!(error = %io::Error::last_os_error(), "munmap failed");
        }
    }
}

fn shm_open(name: &ShmName, flags: libc::c_int, mode: libc::mode_t) -> io::Result<File> {
    let c_name = name.to_cstring();
    // SAFETY: c_name is a valid NUL-terminated string.
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, mode as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by shm_open and is owned by nobody else.
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

fn map(name: &ShmName, file: &File, len: usize) -> Result<ShmMapping, ShmError> {
    use std::os::fd::AsRawFd;

    if len == 0 {
        return Err(ShmError::os(
            "mmap",
            name.as_str(),
            io::Error::new(io::ErrorKind::InvalidData, "object is empty"),
        ));
    }

    // SAFETY: mapping a valid descriptor with a non-zero length; the result is
    // checked against MAP_FAILED below.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(ShmError::os("mmap", name.as_str(), io::Error::last_os_error()));
    }
    let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
        ShmError::os(
            "mmap",
            name.as_str(),
            io::Error::other("mmap returned null"),
        )
    })?;

    // The descriptor is closed when `file` drops; the mapping outlives it.
    Ok(ShmMapping { base, len })
}

/// Remove the object's name. Existing mappings stay valid.
pub fn unlink(name: &ShmName) -> Result<(), ShmError> {
    let c_name = name.to_cstring();
    // SAFETY: c_name is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
        let e = io::Error::last_os_error();
        return Err(match e.raw_os_error() {
            Some(libc::ENOENT) => ShmError::NotFound {
                name: name.to_string(),
            },
            _ => ShmError::os("shm_unlink", name.as_str(), e),
        });
    }
    Ok(())
}

/// True if an object with this name exists.
#[cfg(target_os = "linux")]
pub fn exists(name: &ShmName) -> bool {
    std::path::Path::new("/dev/shm").join(name.id()).exists()
}

/// True if an object with this name exists.
#[cfg(not(target_os = "linux"))]
pub fn exists(name: &ShmName) -> bool {
    shm_open(name, libc::O_RDONLY, 0).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_gets_leading_slash() {
        let name = ShmName::new("telemetry").unwrap();
        assert_eq!(name.as_str(), "/telemetry");
        assert_eq!(name.id(), "telemetry");
        assert_eq!(name.to_string(), "/telemetry");
    }

    #[test]
    fn long_names_are_truncated() {
        let id = "x".repeat(400);
        let name = ShmName::new(&id).unwrap();
        assert_eq!(name.as_str().len(), MAX_NAME_LEN + 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 252 ASCII bytes followed by a two-byte char straddling the limit.
        let id = format!("{}é", "a".repeat(MAX_NAME_LEN - 1));
        let name = ShmName::new(&id).unwrap();
        assert_eq!(name.id(), "a".repeat(MAX_NAME_LEN - 1));
    }

    #[test]
    fn failed_unmap_is_reported() {
        let name = ShmName::new("never-mapped").unwrap();
        // munmap rejects a zero length with EINVAL.
        let mapping = ShmMapping {
            base: NonNull::dangling(),
            len: 0,
        };
        let err = mapping.unmap(&name).unwrap_err();
        assert!(
            matches!(&err, ShmError::Os { op: "munmap", source, .. }
                if source.raw_os_error() == Some(libc::EINVAL)),
            "{err}"
        );
        assert_eq!(err.status(), shmring_primitives::Status::ERROR);
    }

    #[test]
    fn bad_identifiers_are_rejected() {
        for id in ["", "a/b", "nul\0byte"] {
            assert!(
                matches!(ShmName::new(id), Err(ShmError::InvalidName { .. })),
                "{id:?}"
            );
        }
    }
}
