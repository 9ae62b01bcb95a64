//! Optional latency tracking for write and read calls.

use std::time::{Duration, Instant};

/// Running minimum and maximum of a set of durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extremes {
    min: Option<Duration>,
    max: Option<Duration>,
}

impl Extremes {
    pub fn record(&mut self, elapsed: Duration) {
        self.min = Some(self.min.map_or(elapsed, |min| min.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |max| max.max(elapsed)));
    }

    /// Fastest recorded call, if any call was recorded.
    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    /// Slowest recorded call, if any call was recorded.
    pub fn max(&self) -> Option<Duration> {
        self.max
    }
}

/// Per-handle chronometry. Disabled by default; while disabled no clock is
/// read.
#[derive(Debug, Clone, Default)]
pub struct Chronometry {
    enabled: bool,
    write: Extremes,
    read: Extremes,
}

impl Chronometry {
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Forget recorded extremes.
    pub fn reset(&mut self) {
        self.write = Extremes::default();
        self.read = Extremes::default();
    }

    pub fn write(&self) -> Extremes {
        self.write
    }

    pub fn read(&self) -> Extremes {
        self.read
    }

    #[inline]
    pub(crate) fn start(&self) -> Option<Instant> {
        self.enabled.then(Instant::now)
    }

    #[inline]
    pub(crate) fn finish_write(&mut self, start: Option<Instant>) {
        if let Some(start) = start {
            self.write.record(start.elapsed());
        }
    }

    #[inline]
    pub(crate) fn finish_read(&mut self, start: Option<Instant>) {
        if let Some(start) = start {
            self.read.record(start.elapsed());
        }
    }
}
