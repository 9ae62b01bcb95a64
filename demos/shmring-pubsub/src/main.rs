//! shmring-pubsub: publish to and subscribe from a shmring broadcast ring.
//!
//! # Usage
//!
//! ```bash
//! # terminal 1
//! shmring-pubsub publish ticks --count 1000 --interval-ms 10
//! # terminal 2
//! RUST_LOG=shmring=trace shmring-pubsub subscribe ticks
//! ```

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use shmring::{ReadMode, Shm, ShmConfig, ShmError, Status};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shmring-pubsub")]
#[command(about = "Publish and subscribe to a shared memory broadcast ring")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create (or reuse) a ring and write numbered messages into it
    Publish {
        /// Ring identifier
        name: String,
        /// Number of messages to write
        #[arg(long, default_value_t = 100)]
        count: u64,
        /// Pause between messages
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Bytes per slot, used if the ring is created
        #[arg(long, default_value_t = 64)]
        buffer_size: usize,
        /// Number of slots, used if the ring is created
        #[arg(long, default_value_t = 16)]
        buffer_count: usize,
        /// Remove the ring after the last message
        #[arg(long)]
        remove: bool,
    },
    /// Attach to a ring and print what arrives
    Subscribe {
        /// Ring identifier
        name: String,
        /// Which message each poll asks for
        #[arg(long, value_enum, default_value_t = Mode::Next)]
        mode: Mode,
        /// Pause between polls that found nothing new
        #[arg(long, default_value_t = 10)]
        poll_ms: u64,
        /// Stop after this many messages
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Unlink a ring by name
    Remove {
        /// Ring identifier
        name: String,
    },
    /// Report whether a ring exists
    Check {
        /// Ring identifier
        name: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Next,
    Last,
}

impl From<Mode> for ReadMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Next => ReadMode::Next,
            Mode::Last => ReadMode::Last,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Publish {
            name,
            count,
            interval_ms,
            buffer_size,
            buffer_count,
            remove,
        } => publish(
            &name,
            count,
            Duration::from_millis(interval_ms),
            &ShmConfig::new(buffer_size, buffer_count),
            remove,
        ),
        Command::Subscribe {
            name,
            mode,
            poll_ms,
            limit,
        } => subscribe(&name, mode.into(), Duration::from_millis(poll_ms), limit),
        Command::Remove { name } => Shm::unlink(&name),
        Command::Check { name } => {
            let exists = Shm::exists(&name);
            println!("{name}: {}", if exists { "exists" } else { "absent" });
            return if exists {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, status = ?e.status(), "command failed");
            ExitCode::FAILURE
        }
    }
}

fn publish(
    name: &str,
    count: u64,
    interval: Duration,
    config: &ShmConfig,
    remove: bool,
) -> Result<(), ShmError> {
    let mut shm = Shm::create_or_open(name, config)?;
    shm.set_chronometry(true);
    tracing::info!(
        name = shm.name(),
        buffer_size = shm.buffer_size(),
        buffer_count = shm.buffer_count(),
        "publishing"
    );

    for seq in 0..count {
        // Slots keep bytes of longer earlier messages, so terminate each one.
        let message = format!("message {seq}\0");
        let status = shm.write(message.as_bytes());
        if status.is_err() {
            tracing::warn!(seq, ?status, "write failed");
            break;
        }
        if status.contains(Status::RANGE_EXCEEDED) {
            tracing::warn!(seq, "message truncated");
        }
        thread::sleep(interval);
    }

    tracing::info!(
        min = ?shm.min_write_time(),
        max = ?shm.max_write_time(),
        "write latency"
    );

    if remove {
        shm.remove()?;
    }
    Ok(())
}

fn subscribe(
    name: &str,
    mode: ReadMode,
    poll: Duration,
    limit: Option<u64>,
) -> Result<(), ShmError> {
    let mut shm = Shm::open(name)?;
    let mut received = 0u64;

    while limit.is_none_or(|limit| received < limit) {
        let mut text = String::new();
        shm.read_with(mode, shm.buffer_size(), |bytes| {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            text = String::from_utf8_lossy(&bytes[..end]).into_owned();
        });
        let status = shm.status();

        if status.is_ok() {
            received += 1;
            if status.contains(Status::DATA_LOSS) {
                tracing::warn!("fell behind the writer, messages were lost");
            }
            println!("{} {text}", shm.last_read_time());
            continue;
        }

        if status.contains(Status::NOT_EXIST) {
            tracing::info!(received, "ring removed");
            break;
        }
        // No new data, or a write raced the read: try again shortly.
        thread::sleep(poll);
    }

    shm.close()
}
