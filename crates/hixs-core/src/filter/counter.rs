//! Blocked-request counter shared by every tab and window

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic count of blocked requests since process start
#[derive(Debug, Default)]
pub struct TrackerCounter {
    blocked: AtomicU64,
}

impl TrackerCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one blocked request and return the new total
    pub fn increment(&self) -> u64 {
        self.blocked.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> u64 {
        self.blocked.load(Ordering::Acquire)
    }
}
