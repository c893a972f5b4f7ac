use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the logical time used to stamp buffer accesses. Must never go
/// backwards.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// A tick counter advanced from outside, like a timer interrupt would.
#[derive(Debug, Default)]
pub struct Ticks {
    ticks: AtomicU64,
}

impl Ticks {
    pub fn new() -> Self {
        Ticks {
            ticks: AtomicU64::new(0),
        }
    }

    /// Advances the clock by one tick and returns the new time.
    pub fn tick(&self) -> u64 {
        self.advance(1)
    }

    pub fn advance(&self, ticks: u64) -> u64 {
        self.ticks.fetch_add(ticks, Ordering::SeqCst) + ticks
    }
}

impl Clock for Ticks {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}
