use std::time::{Duration, Instant};

/// Monotonic time source. Abstracted so watchdog and playback-clock logic
/// can be driven deterministically in tests instead of real wall time.
pub trait Clock {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;
}

/// `Clock` backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A fake clock for tests: time only advances when [`FakeClock::advance`] is
/// called.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: std::cell::Cell<Instant>,
}

impl FakeClock {
    /// Creates a fake clock pinned to the real current instant.
    pub fn new() -> Self {
        Self {
            now: std::cell::Cell::new(Instant::now()),
        }
    }

    /// Advances the fake clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
