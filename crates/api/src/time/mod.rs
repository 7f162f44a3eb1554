// Path: crates/api/src/time/mod.rs

//! Wall-clock time as seen by the engine.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of unix-millisecond timestamps.
///
/// Deadlines are persisted as absolute timestamps, so restart recovery and
/// tests both depend on swapping this out.
pub trait Clock: Send + Sync {
    /// Milliseconds since the unix epoch.
    fn now_ms(&self) -> u64;
}

/// The operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
