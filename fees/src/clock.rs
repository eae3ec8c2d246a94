use crate::UnixTimestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source injected into the distribution engine so interval gates are
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> UnixTimestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: UnixTimestamp) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn set(&self, now: UnixTimestamp) {
        self.0.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimestamp {
        self.0.load(Ordering::Relaxed)
    }
}
