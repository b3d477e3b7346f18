use std::time::{Duration, Instant};

use crate::clock::Clock;

/// Default timeout armed around a long-running sub-command (per-node
/// command completion, async license acquisition, ...).
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

/// A single deadline timer. Armed when a sub-command is dispatched to a node
/// and expected to complete asynchronously; disarmed when the matching
/// completion callback arrives. A tick that finds an armed, expired
/// watchdog should treat the outstanding sub-command as timed out and route
/// it into error handling.
#[derive(Debug, Default, Clone, Copy)]
pub struct Watchdog {
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Creates a disarmed watchdog.
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arms the watchdog for `timeout` from `clock`'s current time.
    pub fn arm(&mut self, clock: &dyn Clock, timeout: Duration) {
        self.deadline = Some(clock.now() + timeout);
    }

    /// Disarms the watchdog; call this when the awaited completion arrives.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Whether the watchdog is currently armed.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the watchdog is armed and its deadline has passed.
    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.deadline.is_some_and(|deadline| clock.now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn disarmed_watchdog_never_expires() {
        let clock = FakeClock::new();
        let wd = Watchdog::new();
        assert!(!wd.is_armed());
        clock.advance(Duration::from_secs(1000));
        assert!(!wd.is_expired(&clock));
    }

    #[test]
    fn armed_watchdog_expires_after_timeout() {
        let clock = FakeClock::new();
        let mut wd = Watchdog::new();
        wd.arm(&clock, Duration::from_secs(10));
        assert!(wd.is_armed());
        assert!(!wd.is_expired(&clock));
        clock.advance(Duration::from_secs(9));
        assert!(!wd.is_expired(&clock));
        clock.advance(Duration::from_secs(1));
        assert!(wd.is_expired(&clock));
    }

    #[test]
    fn disarm_clears_deadline() {
        let clock = FakeClock::new();
        let mut wd = Watchdog::new();
        wd.arm(&clock, Duration::from_secs(1));
        wd.disarm();
        assert!(!wd.is_armed());
        clock.advance(Duration::from_secs(5));
        assert!(!wd.is_expired(&clock));
    }
}
