//! Monotonic time source
//!
//! **App Start Relative Time Pattern**:
//! - Time is measured from the first access of the process-wide anchor
//! - Unaffected by system clock changes (NTP, manual adjustments)
//! - 64-bit microseconds, so elapsed-time arithmetic never wraps in practice
//!
//! Loops take an `Arc<dyn Clock>` so tests can drive time explicitly with [`MockClock`].

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global anchor point for monotonic time
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic time as microseconds since app start
pub fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Time source shared by both loops
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary fixed origin, never decreasing
    fn now_us(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }
}

/// Wall-clock backed implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        monotonic_micros()
    }
}

/// Manually advanced clock
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    micros: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(start_us)),
        }
    }

    pub fn advance_us(&self, us: u64) {
        self.micros.fetch_add(us, Ordering::AcqRel);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1_000);
    }

    /// Jump to an absolute time; earlier values are ignored
    pub fn set_us(&self, us: u64) {
        self.micros.fetch_max(us, Ordering::AcqRel);
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        self.micros.load(Ordering::Acquire)
    }
}

/// Rate limiter for repetitive log lines
#[derive(Debug, Clone)]
pub struct Throttle {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl Throttle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    /// True at most once per interval
    pub fn ready(&mut self, now_ms: u64) -> bool {
        match self.last_ms {
            Some(last) if now_ms.saturating_sub(last) < self.interval_ms => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            },
        }
    }
}
