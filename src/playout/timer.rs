//! One-shot timers for playout pacing
//!
//! Schedulers never sleep themselves. They ask a [`Timer`] for a handle
//! and are called back with that handle when it expires; the event loop
//! owning the [`TimerQueue`] decides how to wait.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

/// Identifies one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Cancellable one-shot scheduling
pub trait Timer {
    /// Arm a timer firing `delay` from now
    fn schedule(&mut self, delay: Duration) -> TimerHandle;

    /// Disarm a timer; returns false if it already fired or was cancelled
    fn cancel(&mut self, handle: TimerHandle) -> bool;
}

/// Timer wheel driven by the connection clock
///
/// Deadlines are absolute offsets on the clock, so a callback that fires
/// late does not push back the ones after it.
pub struct TimerQueue {
    clock: Arc<dyn Clock>,
    next_handle: u64,
    /// (deadline, handle), ordered by deadline then arming order
    armed: BTreeSet<(Duration, TimerHandle)>,
}

impl TimerQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_handle: 1,
            armed: BTreeSet::new(),
        }
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Duration> {
        self.armed.iter().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn expired(&mut self, now: Duration) -> Vec<TimerHandle> {
        let mut due = Vec::new();
        while let Some(&(deadline, handle)) = self.armed.iter().next() {
            if deadline > now {
                break;
            }
            self.armed.remove(&(deadline, handle));
            due.push(handle);
        }
        due
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.armed.iter().any(|(_, h)| *h == handle)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn clear(&mut self) {
        self.armed.clear();
    }
}

impl Timer for TimerQueue {
    fn schedule(&mut self, delay: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.armed.insert((self.clock.now() + delay, handle));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        let entry = self.armed.iter().find(|(_, h)| *h == handle).copied();
        match entry {
            Some(entry) => self.armed.remove(&entry),
            None => false,
        }
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_expiry_order() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new(clock.clone());

        let late = timers.schedule(Duration::from_millis(30));
        let early = timers.schedule(Duration::from_millis(10));
        let same = timers.schedule(Duration::from_millis(10));
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(10)));

        assert!(timers.expired(Duration::from_millis(9)).is_empty());
        assert_eq!(timers.expired(Duration::from_millis(10)), vec![early, same]);
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(30)));

        clock.advance(Duration::from_millis(100));
        assert_eq!(timers.expired(clock.now()), vec![late]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new(clock);

        let handle = timers.schedule(Duration::from_millis(5));
        assert!(timers.is_armed(handle));
        assert!(timers.cancel(handle));
        assert!(!timers.cancel(handle));
        assert!(timers.expired(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_deadline_is_relative_to_clock() {
        let clock = ManualClock::new();
        clock.set(Duration::from_millis(500));
        let mut timers = TimerQueue::new(clock);

        timers.schedule(Duration::from_millis(20));
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(520)));
    }
}
