//! Broadcast fixed-size messages between processes through a POSIX shared
//! memory ring.
//!
//! One process creates a named ring and writes into it; any number of
//! processes attach by name and read, each at its own pace. Writers never
//! wait for readers. A reader that falls more than a full ring behind is told
//! so through [`Status::DATA_LOSS`] and resumes at the newest message.
//!
//! ```no_run
//! use shmring::{ReadMode, Shm, ShmConfig};
//!
//! let mut writer = Shm::create("telemetry", &ShmConfig::new(64, 4))?;
//! writer.write(b"hello");
//!
//! let mut reader = Shm::open("telemetry")?;
//! let mut buf = [0u8; 64];
//! reader.read(ReadMode::Last, &mut buf);
//! assert!(reader.status().is_ok());
//!
//! writer.remove()?;
//! # Ok::<(), shmring::ShmError>(())
//! ```
//!
//! The protocol itself lives in [`shmring_primitives`] and can be driven over
//! any memory region.

pub mod chrono;
pub mod config;
pub mod error;
pub mod posix;
mod shm;

pub use config::{AccessMode, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE, OpenOption, ShmConfig};
pub use error::ShmError;
pub use posix::{MAX_NAME_LEN, ShmName};
pub use shm::Shm;
pub use shmring_primitives::{ReadMode, Status};
