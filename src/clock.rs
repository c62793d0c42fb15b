//! Time source and blocking sleep used by the guards and the poller.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall clock plus a blocking sleep.
///
/// Everything that stamps state or waits goes through this trait so tests
/// can run the state machine without real delays.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);

    /// Time since `start`, clamped at zero if the clock went backwards.
    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.now() - start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};

    use chrono::TimeZone;

    use super::*;

    /// Manually driven clock: `sleep` advances time and is recorded.
    pub struct FakeClock {
        now: Cell<DateTime<Utc>>,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                now: Cell::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()),
                sleeps: RefCell::new(Vec::new()),
            }
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.borrow().clone()
        }

        pub fn advance(&self, duration: Duration) {
            let step = chrono::Duration::from_std(duration).unwrap();
            self.now.set(self.now.get() + step);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
            self.advance(duration);
        }
    }

    #[test]
    fn test_fake_clock_sleep_advances_time() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(3));
        clock.sleep(Duration::from_secs(2));
        assert_eq!(clock.elapsed_since(start), Duration::from_secs(5));
        assert_eq!(clock.sleeps(), [Duration::from_secs(3), Duration::from_secs(2)]);
    }

    #[test]
    fn test_elapsed_since_future_is_zero() {
        let clock = FakeClock::new();
        let future = clock.now() + chrono::Duration::seconds(10);
        assert_eq!(clock.elapsed_since(future), Duration::ZERO);
    }
}
