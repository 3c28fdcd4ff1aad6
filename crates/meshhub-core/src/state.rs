//! Process-wide logical clock.
//!
//! The counter is seeded from wall-clock milliseconds so that a restarted
//! hub emits values above anything it emitted before the restart, without
//! persisting anything. Peers treat a higher value as newer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub struct StateCounter {
    value: AtomicU64,
}

impl StateCounter {
    /// Seed from the current wall clock.
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(now_millis()),
        }
    }

    /// Seed after a restart where the last emitted value is known.
    pub fn recovered(previous: u64) -> Self {
        Self {
            value: AtomicU64::new(now_millis().max(previous.saturating_add(1))),
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Bump the counter and return the new value.
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for StateCounter {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
