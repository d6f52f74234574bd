//! Connection-scoped time reference
//!
//! Every connection captures one clock at construction. The handshake
//! time field, outbound message timestamps and playout pacing are all
//! measured against it, so nothing depends on a process-wide epoch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source measured from the clock's own origin
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Elapsed time as a wrapping 32-bit millisecond value (RTMP timestamp)
    fn now_ms(&self) -> u32 {
        self.now().as_millis() as u32
    }
}

/// Real clock anchored at the instant it was created
#[derive(Debug, Clone, Copy)]
pub struct ConnectionClock {
    origin: Instant,
}

impl ConnectionClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Wall instant corresponding to an offset on this clock
    pub fn instant_at(&self, offset: Duration) -> Instant {
        self.origin + offset
    }
}

impl Default for ConnectionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ConnectionClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests and offline processing
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, now: Duration) {
        self.micros.store(now.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 250);

        clock.set(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), 2000);
    }

    #[test]
    fn test_connection_clock_is_monotonic() {
        let clock = ConnectionClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
