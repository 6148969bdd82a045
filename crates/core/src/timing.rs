//! Injectable time source and packet spacing.
//!
//! Every sleep in the crate goes through [`Clock`] so that retry and
//! reconnect loops can run against virtual time in tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source with blocking sleep.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, d: Duration);
}

/// Wall clock backed by [`Instant`] and [`std::thread::sleep`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

pub fn msleep(clock: &dyn Clock, ms: u64) {
    clock.sleep(Duration::from_millis(ms));
}

/// Enforces a minimum gap between consecutive packets.
///
/// Some firmware drops a command that arrives too soon after the previous
/// one. Call [`enter`](Self::enter) before a transfer and
/// [`leave`](Self::leave) after it.
#[derive(Debug, Clone)]
pub struct EventSpacing {
    spacing: Duration,
    last: Option<Duration>,
}

impl EventSpacing {
    pub fn new(spacing_ms: u64) -> Self {
        Self {
            spacing: Duration::from_millis(spacing_ms),
            last: None,
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Sleep until at least `spacing` has passed since the last `leave`.
    pub fn enter(&self, clock: &dyn Clock) {
        if let Some(last) = self.last {
            let due = last + self.spacing;
            let now = clock.now();
            if due > now {
                clock.sleep(due - now);
            }
        }
    }

    pub fn leave(&mut self, clock: &dyn Clock) {
        self.last = Some(clock.now());
    }
}

/// Virtual clock for tests.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Clock whose `sleep` advances virtual time instantly.
    #[derive(Default)]
    pub struct FakeClock {
        now: Mutex<Duration>,
        slept: Mutex<Vec<Duration>>,
    }

    impl FakeClock {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn advance(&self, d: Duration) {
            *self.now.lock().unwrap() += d;
        }

        /// Every sleep request so far, in order.
        pub fn sleeps(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, d: Duration) {
            self.slept.lock().unwrap().push(d);
            self.advance(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::FakeClock;
    use super::*;

    #[test]
    fn spacing_sleeps_only_for_the_remaining_gap() {
        let clock = FakeClock::new();
        let mut spacing = EventSpacing::new(25);

        // first packet goes out immediately
        spacing.enter(clock.as_ref());
        spacing.leave(clock.as_ref());
        assert!(clock.sleeps().is_empty());

        clock.advance(Duration::from_millis(10));
        spacing.enter(clock.as_ref());
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(15)]);
    }

    #[test]
    fn spacing_does_not_sleep_after_long_idle() {
        let clock = FakeClock::new();
        let mut spacing = EventSpacing::new(35);
        spacing.enter(clock.as_ref());
        spacing.leave(clock.as_ref());
        clock.advance(Duration::from_millis(100));
        spacing.enter(clock.as_ref());
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn fake_clock_sleep_advances_time() {
        let clock = FakeClock::new();
        msleep(clock.as_ref(), 250);
        assert_eq!(clock.now(), Duration::from_millis(250));
    }
}
