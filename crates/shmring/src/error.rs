use std::fmt;
use std::io;

use shmring_primitives::{AttachError, LayoutError, Status};

/// Errors from creating, attaching to, or tearing down a ring.
#[derive(Debug)]
pub enum ShmError {
    /// The identifier cannot name a shared memory object.
    InvalidName { name: String, reason: &'static str },
    /// `buffer_size` or `buffer_count` is zero.
    InvalidGeometry {
        buffer_size: usize,
        buffer_count: usize,
    },
    /// A region with this name already exists.
    AlreadyExists { name: String },
    /// No region with this name exists.
    NotFound { name: String },
    /// The region's backing object still exists but its owner removed it.
    Removed { name: String },
    /// The region's size or geometry does not describe a valid ring.
    Layout { name: String, source: LayoutError },
    /// A system call failed.
    Os {
        op: &'static str,
        name: String,
        source: io::Error,
    },
    /// The host cannot provide lock-free atomics of the widths the ring uses.
    AtomicsNotLockFree,
}

impl ShmError {
    /// Status bits a handle carries after failing with this error.
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidGeometry { .. } => Status::failed(Status::RANGE_EXCEEDED),
            Self::NotFound { .. } | Self::Removed { .. } => Status::failed(Status::NOT_EXIST),
            _ => Status::ERROR,
        }
    }

    pub(crate) fn os(op: &'static str, name: &str, source: io::Error) -> Self {
        Self::Os {
            op,
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn attach(name: &str, e: AttachError) -> Self {
        match e {
            AttachError::Removed => Self::Removed {
                name: name.to_owned(),
            },
            AttachError::Layout(source) => Self::Layout {
                name: name.to_owned(),
                source,
            },
        }
    }
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { name, reason } => {
                write!(f, "invalid shared memory name {name:?}: {reason}")
            }
            Self::InvalidGeometry {
                buffer_size,
                buffer_count,
            } => write!(
                f,
                "invalid ring geometry: buffer_size={buffer_size}, buffer_count={buffer_count}"
            ),
            Self::AlreadyExists { name } => write!(f, "shared memory {name} already exists"),
            Self::NotFound { name } => write!(f, "shared memory {name} does not exist"),
            Self::Removed { name } => write!(f, "shared memory {name} has been removed"),
            Self::Layout { name, source } => write!(f, "shared memory {name}: {source}"),
            Self::Os { op, name, source } => write!(f, "{op} failed for {name}: {source}"),
            Self::AtomicsNotLockFree => {
                write!(f, "atomics required by the ring are not lock-free on this platform")
            }
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Os { source, .. } => Some(source),
            Self::Layout { source, .. } => Some(source),
            _ => None,
        }
    }
}
