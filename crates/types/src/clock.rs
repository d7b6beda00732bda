use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;

/// Monotonic tick counter driving all time-based behavior in the emulator:
/// sleep wake-ups, generator cadence, and snapshot scheduling.
///
/// The counter itself is a plain atomic; the thread that advances it lives in
/// the kernel crate. Readers only ever observe it with an atomic load, so a
/// `Clock` can be shared freely behind an `Arc`.
#[derive(Debug, Default)]
pub struct Clock {
    ticks: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Current tick value.
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Advance the clock by one tick and return the new value.
    pub fn advance(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Wall-clock stamp in the format the report and PRINT logs use.
pub fn local_timestamp() -> String {
    Local::now().format("(%m/%d/%Y %I:%M:%S%p)").to_string()
}
