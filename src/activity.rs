//! Last-activity timestamp read by the boredom detector.

use std::time::Duration;
use tokio::time::Instant;

/// When the companion last did (or was asked to do) something visible.
#[derive(Debug, Clone, Copy)]
pub struct ActivityClock {
    last_activity: Instant,
}

impl ActivityClock {
    pub fn new(now: Instant) -> Self {
        Self { last_activity: now }
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Record activity at `now`. Never moves the clock backwards.
    pub fn record(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Explicitly set the clock, even backwards.
    pub fn reset(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time elapsed since the last activity, zero if `now` precedes it.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_monotonic() {
        let t0 = Instant::now();
        let mut clock = ActivityClock::new(t0 + Duration::from_secs(5));
        clock.record(t0);
        assert_eq!(clock.last_activity(), t0 + Duration::from_secs(5));
        clock.record(t0 + Duration::from_secs(6));
        assert_eq!(clock.last_activity(), t0 + Duration::from_secs(6));
    }

    #[test]
    fn reset_may_move_backwards() {
        let t0 = Instant::now();
        let mut clock = ActivityClock::new(t0 + Duration::from_secs(5));
        clock.reset(t0);
        assert_eq!(clock.last_activity(), t0);
    }

    #[test]
    fn idle_for_saturates() {
        let t0 = Instant::now();
        let clock = ActivityClock::new(t0 + Duration::from_secs(1));
        assert_eq!(clock.idle_for(t0), Duration::ZERO);
        assert_eq!(
            clock.idle_for(t0 + Duration::from_secs(4)),
            Duration::from_secs(3)
        );
    }
}
