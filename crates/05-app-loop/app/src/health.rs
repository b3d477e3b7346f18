//! Datapath health tracking for the auto-pause/resume path.
//!
//! A real sink reports `BufferUnderflow` well before it actually runs dry;
//! the engine throttles how eagerly it re-triggers `AutoPause` while a
//! relief window from a previous underflow is still draining, mirroring
//! the backpressure-recovery window other stall-prone submission paths in
//! this workspace use.

/// Latch-style health indicators surfaced by `GetPVPlayerState` diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HealthFlags {
    /// `true` while any active datapath has an outstanding `BufferUnderflow`
    /// not yet cleared by a `DataReady`.
    pub buffer_starved: bool,
    /// `true` once a node has reported an unsolicited error and the engine
    /// is mid error-handling teardown.
    pub fatal: bool,
}

/// Aggregates health flags with underflow-relief bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub flags: HealthFlags,
    /// Remaining ticks to suppress a redundant `AutoPause` re-trigger while
    /// the previous one is still being unwound.
    pub relief_ticks: u8,
}

impl Health {
    /// Starts or extends a relief window after an underflow is observed.
    pub fn begin_relief(&mut self, ticks: u8) {
        self.flags.buffer_starved = true;
        if ticks > self.relief_ticks {
            self.relief_ticks = ticks;
        }
    }

    /// Decrements the relief window by one tick if active.
    pub fn decay_one_tick(&mut self) {
        if self.relief_ticks > 0 {
            self.relief_ticks -= 1;
        }
    }

    /// Clears the starvation flag once data is flowing again.
    pub fn clear_on_data_ready(&mut self) {
        self.flags.buffer_starved = false;
        self.decay_one_tick();
    }

    /// `true` while a relief window is suppressing a re-trigger.
    pub fn in_relief(&self) -> bool {
        self.relief_ticks > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relief_window_extends_to_the_longer_request() {
        let mut health = Health::default();
        health.begin_relief(3);
        health.begin_relief(1);
        assert_eq!(health.relief_ticks, 3);
    }

    #[test]
    fn data_ready_clears_starvation_and_decays_relief() {
        let mut health = Health::default();
        health.begin_relief(2);
        health.clear_on_data_ready();
        assert!(!health.flags.buffer_starved);
        assert_eq!(health.relief_ticks, 1);
    }
}
