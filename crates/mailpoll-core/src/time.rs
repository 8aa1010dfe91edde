//! Clocks and countdown timers.
//!
//! Every timeout in the engines (connect, send, read, idle refresh) is a
//! [`Timer`] checked against a [`Clock`]. Tests swap in [`MockClock`] so
//! expiry can be driven without sleeping.
//!
//! # Example
//!
//! ```
//! use mailpoll_core::time::{Clock, MockClock, Timer};
//! use std::time::Duration;
//!
//! let clock = MockClock::new();
//! let mut timer = Timer::new();
//! timer.feed(Duration::from_secs(30), clock.now());
//!
//! clock.advance(Duration::from_secs(29));
//! assert!(!timer.expired(clock.now()));
//!
//! clock.advance(Duration::from_secs(1));
//! assert!(timer.expired(clock.now()));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time.
///
/// Use [`SystemClock`] in production and [`MockClock`] in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Returns the elapsed time since the given instant.
    fn elapsed(&self, since: Instant) -> Duration {
        self.now().saturating_duration_since(since)
    }

    /// Checks if a duration has elapsed since the given instant.
    fn has_elapsed(&self, since: Instant, duration: Duration) -> bool {
        self.elapsed(since) >= duration
    }
}

/// Wall clock backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct MockClock {
    base: Instant,
    offset_nanos: AtomicU64,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Creates a mock clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Creates a mock clock that can be handed to an engine and still
    /// advanced by the test.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances the clock by the given duration.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, duration: Duration) {
        self.offset_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Returns the current offset from the base time.
    #[must_use]
    pub fn offset(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        self.as_ref().now()
    }
}

/// Shared clock handle held by the engines.
pub type SharedClock = Arc<dyn Clock>;

/// Returns a shared handle to the system clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Monotonic countdown.
///
/// A timer is idle until [`feed`](Self::feed) arms it. An idle timer never
/// reports expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
    period: Duration,
}

impl Timer {
    /// Creates an idle timer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            deadline: None,
            period: Duration::ZERO,
        }
    }

    /// Arms (or re-arms) the timer to expire `period` after `now`.
    pub fn feed(&mut self, period: Duration, now: Instant) {
        self.period = period;
        self.deadline = Some(now + period);
    }

    /// Disarms the timer.
    pub const fn stop(&mut self) {
        self.deadline = None;
    }

    /// Returns true while the timer is armed.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns the period the timer was last armed with.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Time left before expiry; zero once expired or when idle.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline
            .map_or(Duration::ZERO, |d| d.saturating_duration_since(now))
    }

    /// Returns true once an armed timer has run out.
    #[must_use]
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    mod clock_tests {
        use super::*;

        #[test]
        fn mock_clock_advances() {
            let clock = MockClock::new();
            let start = clock.now();
            clock.advance(Duration::from_secs(5));
            assert_eq!(clock.elapsed(start), Duration::from_secs(5));
            assert!(clock.has_elapsed(start, Duration::from_secs(5)));
            assert!(!clock.has_elapsed(start, Duration::from_secs(6)));
        }

        #[test]
        fn shared_mock_clock_is_a_clock() {
            let clock = MockClock::shared();
            let handle: SharedClock = clock.clone();
            let start = handle.now();
            clock.advance(Duration::from_millis(250));
            assert_eq!(handle.elapsed(start), Duration::from_millis(250));
        }

        #[test]
        fn system_clock_is_monotonic() {
            let clock = SystemClock;
            let a = clock.now();
            let b = clock.now();
            assert!(b >= a);
        }
    }

    mod timer_tests {
        use super::*;

        #[test]
        fn idle_timer_never_expires() {
            let clock = MockClock::new();
            let timer = Timer::new();
            clock.advance(Duration::from_secs(3600));
            assert!(!timer.is_running());
            assert!(!timer.expired(clock.now()));
            assert_eq!(timer.remaining(clock.now()), Duration::ZERO);
        }

        #[test]
        fn expires_after_period() {
            let clock = MockClock::new();
            let mut timer = Timer::new();
            timer.feed(Duration::from_secs(10), clock.now());
            assert_eq!(timer.remaining(clock.now()), Duration::from_secs(10));

            clock.advance(Duration::from_secs(4));
            assert_eq!(timer.remaining(clock.now()), Duration::from_secs(6));
            assert!(!timer.expired(clock.now()));

            clock.advance(Duration::from_secs(6));
            assert!(timer.expired(clock.now()));
            assert_eq!(timer.remaining(clock.now()), Duration::ZERO);
        }

        #[test]
        fn feed_rearms() {
            let clock = MockClock::new();
            let mut timer = Timer::new();
            timer.feed(Duration::from_secs(1), clock.now());
            clock.advance(Duration::from_secs(2));
            assert!(timer.expired(clock.now()));

            timer.feed(Duration::from_secs(1), clock.now());
            assert!(!timer.expired(clock.now()));
            assert_eq!(timer.period(), Duration::from_secs(1));
        }

        #[test]
        fn stop_disarms() {
            let clock = MockClock::new();
            let mut timer = Timer::new();
            timer.feed(Duration::from_millis(1), clock.now());
            timer.stop();
            clock.advance(Duration::from_secs(1));
            assert!(!timer.expired(clock.now()));
        }
    }
}
