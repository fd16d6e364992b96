//! Time sources used when computing certificate validity and OCSP update
//! times.
use std::{
    fmt::Debug,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use arc_swap::ArcSwap;
use ca_shared::time::Duration;

pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Reads the current time from the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock which only moves when told to. Clones share the same time.
#[derive(Clone, Debug)]
pub struct FakeClock(Arc<ArcSwap<SystemTime>>);

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(now)))
    }

    pub fn set(&self, now: SystemTime) {
        self.0.store(Arc::new(now));
    }

    pub fn advance(&self, by: Duration) {
        let now = **self.0.load();
        self.set(now + by);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000))
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        **self.0.load()
    }
}

/// Drops the sub-second part of `time`, certificates only carry whole
/// seconds.
pub fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => UNIX_EPOCH + std::time::Duration::from_secs(since_epoch.as_secs()),
        Err(_) => time,
    }
}
