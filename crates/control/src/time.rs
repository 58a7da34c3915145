use core::ops::Add;
use core::time::Duration;

/// Milliseconds since the controller booted.
///
/// Everything in the control core takes the current time as an argument
/// instead of reading a clock, so that tests and the simulator can run on
/// their own timelines.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    pub const fn from_millis(ms: u64) -> Self {
        Instant(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        let ms = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Instant(self.0.saturating_add(ms))
    }
}

/// A repeating task.
///
/// Whoever owns the `Periodic` owns the task: there is no registration to
/// undo, and dropping it cancels it. State machines keep these inside the
/// stage that needs them, so leaving the stage is enough to stop the task.
#[derive(Clone, Debug)]
pub struct Periodic {
    period: Duration,
    next: Instant,
}

impl Periodic {
    /// A task that is due immediately, and every `period` after that.
    pub fn new(period: Duration, now: Instant) -> Self {
        Periodic { period, next: now }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns true (and schedules the next run) if the task is due.
    ///
    /// Runs that were missed because nobody polled are not made up.
    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next = self.next + self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
        true
    }
}
