bitflags::bitflags! {
    /// Outcome of the last lifecycle, write or read call on a ring handle.
    ///
    /// Reset to [`Status::OK`] at the start of each call and OR-combined with
    /// every condition met during it. Several bits can be set at once: a
    /// truncated write that otherwise succeeds reports `OK | RANGE_EXCEEDED`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        const OK = 1 << 0;
        const ERROR = 1 << 1;
        /// Nothing has been committed since the previous successful read.
        const NO_NEW_DATA = 1 << 2;
        /// The writer lapped the reader; unread writes were overwritten.
        const DATA_LOSS = 1 << 3;
        /// The slot was overwritten between selection and validation.
        const STALE_DATA = 1 << 4;
        /// A write overlapped the slot being read.
        const WRITE_IN_PROGRESS = 1 << 5;
        /// A caller buffer exceeded `buffer_size` and was truncated.
        const RANGE_EXCEEDED = 1 << 6;
        /// The region is closed, removed, or was never created.
        const NOT_EXIST = 1 << 7;
    }
}

impl Status {
    /// Status of a call that failed with `condition`.
    #[inline]
    pub fn failed(condition: Status) -> Self {
        Status::ERROR | condition
    }

    /// Turn an in-progress status into a failure, keeping the non-fatal
    /// conditions already recorded for this call.
    #[inline]
    pub fn fail(&mut self, condition: Status) {
        self.remove(Status::OK);
        self.insert(Status::ERROR | condition);
    }

    /// True if the call succeeded, possibly with non-fatal conditions.
    #[inline]
    pub fn is_ok(self) -> bool {
        self.contains(Status::OK) && !self.contains(Status::ERROR)
    }

    /// True if the call failed.
    #[inline]
    pub fn is_err(self) -> bool {
        self.contains(Status::ERROR)
    }
}
