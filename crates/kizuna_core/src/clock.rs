//! Time source for cooldowns, timers and greet type decisions.
//!
//! All behaviour timing reads seconds from a `Clock` so tests can drive a
//! simulated clock instead of sleeping.

use chrono::{Local, Timelike};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    /// Seconds on a monotonic-enough timeline (wall clock for `SystemClock`).
    fn now(&self) -> f64;

    /// Local hour of day (0-23).
    fn local_hour(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Local::now().timestamp_millis() as f64 / 1000.0
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// Manually advanced clock. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    secs_bits: Arc<AtomicU64>,
    hour: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            secs_bits: Arc::new(AtomicU64::new(start.to_bits())),
            hour: Arc::new(AtomicU32::new(12)),
        }
    }

    pub fn advance(&self, secs: f64) {
        let next = self.now() + secs;
        self.secs_bits.store(next.to_bits(), Ordering::SeqCst);
    }

    pub fn set(&self, secs: f64) {
        self.secs_bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn set_hour(&self, hour: u32) {
        self.hour.store(hour % 24, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        // Start well past zero so "never happened" cooldowns read as elapsed.
        Self::new(1_000_000.0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.secs_bits.load(Ordering::SeqCst))
    }

    fn local_hour(&self) -> u32 {
        self.hour.load(Ordering::SeqCst)
    }
}
