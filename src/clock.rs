//! Injectable clock so cycles and freshness windows are steppable in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now_ts(&self) -> u64;
}

/// Wall clock used by the live loop.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ts(&self) -> u64 {
        chrono::Utc::now().timestamp() as u64
    }
}

/// Deterministic clock for tests: starts at an epoch and only moves when
/// advanced explicitly.
#[derive(Clone)]
pub struct VirtualClock {
    now: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new(start_ts: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start_ts)) }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, ts: u64) {
        self.now.store(ts, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_ts(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_clock_advances() {
        let clock = VirtualClock::new(1_000);
        assert_eq!(clock.now_ts(), 1_000);
        clock.advance(60);
        assert_eq!(clock.now_ts(), 1_060);
        clock.set(5_000);
        assert_eq!(clock.now_ts(), 5_000);
    }

    #[test]
    fn test_virtual_clock_shared_between_clones() {
        let clock = VirtualClock::new(0);
        let other = clock.clone();
        clock.advance(10);
        assert_eq!(other.now_ts(), 10);
    }
}
