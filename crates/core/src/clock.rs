//! Monotonic microsecond clocks.
//!
//! All pacing, RTP timestamps and NTP values derive from a single clock
//! reading in microseconds. The origin is arbitrary; only differences and
//! internal consistency matter.

use tokio::time::Instant;

/// Source of monotonic time in microseconds.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Clock backed by tokio's [`Instant`], counting from construction.
///
/// Follows tokio's paused test clock, so pacing and timers agree in tests.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}
