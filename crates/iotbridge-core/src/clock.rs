//! Wall-clock source, swappable in tests.

use parking_lot::Mutex;
use std::sync::Arc;

/// Source of "current time" in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        Self {
            now: Mutex::new(start_secs),
        }
    }

    pub fn set(&self, secs: f64) {
        *self.now.lock() = secs;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        *self.now.lock()
    }
}

/// The default clock for production wiring.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
