use std::fmt;

#[cfg(test)]
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of block timestamps, in unix milliseconds
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> i64;
}

/// Wall clock used outside of tests
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Deterministic clock that advances by a fixed step on every reading
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    current: AtomicI64,
    step: i64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: i64, step: i64) -> Self {
        ManualClock {
            current: AtomicI64::new(start),
            step,
        }
    }

    /// A clock that always reads `at`
    pub fn fixed(at: i64) -> Self {
        Self::new(at, 0)
    }

    /// A clock whose readings are always further apart than the mine rate,
    /// which drives the difficulty down to its floor
    pub fn slow() -> Self {
        Self::new(1_700_000_000_000, crate::config::MINE_RATE + 1)
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.current.fetch_add(self.step, Ordering::SeqCst)
    }
}
