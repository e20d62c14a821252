//! Access to the current time goes through the `Clock` trait so that
//! time-sensitive logic stays deterministic under test.

use jiff::{tz::TimeZone, SignedDuration, Timestamp, Zoned, ZonedArithmetic};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};

/// Interface to the current time.
///
/// The scheduler and its executors never call `Zoned::now` directly; they
/// ask the clock they were configured with.  Swapping in a [`ManualClock`]
/// makes trigger and dispatch behavior fully reproducible.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Return the current time.
    fn now(&self) -> Zoned;
}

/// The default [`Clock`], backed by the system clock and rendered in a
/// fixed timezone.
#[derive(Debug, Clone)]
pub struct SystemClock {
    tz: TimeZone,
}

impl SystemClock {
    pub fn new(tz: TimeZone) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(TimeZone::system())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Zoned {
        Timestamp::now().to_zoned(self.tz.clone())
    }
}

/// A clock that only moves when told to.
///
/// Cloning is shallow: all clones observe the same instant, so a test can
/// hand one clone to the scheduler and keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Zoned>>,
}

impl ManualClock {
    pub fn new(start: Zoned) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward (or backward, for the truly adventurous).
    ///
    /// # Panics
    ///
    /// Panics if the arithmetic overflows the representable range.
    pub fn advance(&self, amount: impl Into<ZonedArithmetic>) {
        let mut current = self.current.lock();
        *current = current
            .checked_add(amount)
            .expect("manual clock advanced out of range");
    }

    /// Jump the clock to a specific instant.
    pub fn set(&self, to: Zoned) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Zoned {
        self.current.lock().clone()
    }
}

/// Whole milliseconds from `earlier` to `later`; negative if they are reversed.
pub(crate) fn millis_between(later: &Zoned, earlier: &Zoned) -> i64 {
    later.timestamp().as_millisecond() - earlier.timestamp().as_millisecond()
}

/// Clamp a signed duration into a non-negative `std::time::Duration`.
pub(crate) fn to_std_duration(duration: SignedDuration) -> std::time::Duration {
    let millis = duration.as_millis().max(0);
    std::time::Duration::from_millis(millis.try_into().unwrap_or(u64::MAX))
}
