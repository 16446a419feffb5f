//! Idle detection and random autonomous behaviors.
//!
//! Every tick the detector compares the activity clock against the bored
//! threshold. Once exceeded it picks one of five behaviors uniformly and
//! resets the clock. Starting, stopping and scheduling the stop of the
//! chosen behavior is done by the scene, which owns the timers.

use crate::activity::ActivityClock;
use crate::config::BehaviorConfig;
use crate::entity::{EntityMode, Routine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Autonomous behaviors the companion falls back to when nobody interacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoredBehavior {
    Sleep,
    Dance,
    Excite,
    Roll,
    Blink,
}

impl BoredBehavior {
    pub const ALL: [BoredBehavior; 5] = [
        BoredBehavior::Sleep,
        BoredBehavior::Dance,
        BoredBehavior::Excite,
        BoredBehavior::Roll,
        BoredBehavior::Blink,
    ];

    /// Uniform pick over [`BoredBehavior::ALL`].
    pub fn random(rng: &mut impl Rng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    /// Animation routine driven by this behavior. Blink is instantaneous.
    #[must_use]
    pub fn routine(self) -> Option<Routine> {
        match self {
            Self::Sleep => Some(Routine::Sleeping),
            Self::Dance => Some(Routine::Dancing),
            Self::Excite => Some(Routine::Excited),
            Self::Roll => Some(Routine::Rolling),
            Self::Blink => None,
        }
    }

    /// Mode tracked while the routine runs. Rolling has no dedicated mode.
    #[must_use]
    pub fn mode(self) -> Option<EntityMode> {
        match self {
            Self::Sleep => Some(EntityMode::Sleeping),
            Self::Dance => Some(EntityMode::Dancing),
            Self::Excite => Some(EntityMode::Excited),
            Self::Roll | Self::Blink => None,
        }
    }

    /// How long the routine runs before its stop callback; `None` for blink.
    #[must_use]
    pub fn run_time(self, config: &BehaviorConfig) -> Option<Duration> {
        let secs = match self {
            Self::Sleep => config.sleep_secs,
            Self::Dance => config.dance_secs,
            Self::Excite => config.excite_secs,
            Self::Roll => config.roll_secs,
            Self::Blink => return None,
        };
        Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Dance => "dance",
            Self::Excite => "excite",
            Self::Roll => "roll",
            Self::Blink => "blink",
        }
    }
}

impl fmt::Display for BoredBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides when the companion gets bored.
#[derive(Debug, Clone)]
pub struct BoredomDetector {
    threshold: Duration,
}

impl BoredomDetector {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Run one check.
    ///
    /// Falling is exempt and leaves the clock untouched, so idle time keeps
    /// accumulating across the fall. When the threshold is strictly exceeded
    /// a behavior is chosen and the clock reset to `now`.
    pub fn check(
        &self,
        now: Instant,
        mode: EntityMode,
        clock: &mut ActivityClock,
        rng: &mut impl Rng,
    ) -> Option<BoredBehavior> {
        if mode == EntityMode::Falling {
            return None;
        }

        let idle = clock.idle_for(now);
        if idle <= self.threshold {
            return None;
        }

        let behavior = BoredBehavior::random(rng);
        tracing::info!(
            idle_secs = idle.as_secs_f64(),
            %behavior,
            "companion is bored"
        );
        clock.reset(now);
        Some(behavior)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn detector() -> BoredomDetector {
        BoredomDetector::new(Duration::from_secs(10))
    }

    #[test]
    fn threshold_must_be_strictly_exceeded() {
        let t0 = Instant::now();
        let mut clock = ActivityClock::new(t0);
        let mut rng = StdRng::seed_from_u64(1);

        let at_threshold = t0 + Duration::from_secs(10);
        assert!(detector().check(at_threshold, EntityMode::Idle, &mut clock, &mut rng).is_none());
        assert_eq!(clock.last_activity(), t0);

        let past = t0 + Duration::from_millis(10_001);
        assert!(detector().check(past, EntityMode::Idle, &mut clock, &mut rng).is_some());
        assert_eq!(clock.last_activity(), past);
    }

    #[test]
    fn falling_never_triggers_nor_touches_clock() {
        let t0 = Instant::now();
        let mut clock = ActivityClock::new(t0);
        let mut rng = StdRng::seed_from_u64(2);

        for secs in [0_u64, 11, 100, 10_000] {
            let now = t0 + Duration::from_secs(secs);
            assert!(detector().check(now, EntityMode::Falling, &mut clock, &mut rng).is_none());
            assert_eq!(clock.last_activity(), t0);
        }

        // Idle time accumulated during the fall counts once falling ends.
        let now = t0 + Duration::from_secs(10_001);
        assert!(detector().check(now, EntityMode::Idle, &mut clock, &mut rng).is_some());
    }

    #[test]
    fn every_non_falling_mode_can_get_bored() {
        let t0 = Instant::now();
        let mut rng = StdRng::seed_from_u64(3);
        for mode in EntityMode::ALL {
            if mode == EntityMode::Falling {
                continue;
            }
            let mut clock = ActivityClock::new(t0);
            let now = t0 + Duration::from_secs(11);
            assert!(detector().check(now, mode, &mut clock, &mut rng).is_some(), "{mode}");
            assert_eq!(clock.last_activity(), now);
        }
    }

    #[test]
    fn selection_is_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut counts: HashMap<BoredBehavior, usize> = HashMap::new();
        for _ in 0..5_000 {
            *counts.entry(BoredBehavior::random(&mut rng)).or_default() += 1;
        }
        assert_eq!(counts.len(), 5);
        for behavior in BoredBehavior::ALL {
            let n = counts[&behavior];
            assert!((800..1_200).contains(&n), "{behavior}: {n}");
        }
    }

    #[test]
    fn run_times_follow_config() {
        let config = BehaviorConfig::default();
        assert_eq!(BoredBehavior::Sleep.run_time(&config), Some(Duration::from_secs(5)));
        assert_eq!(BoredBehavior::Dance.run_time(&config), Some(Duration::from_secs(4)));
        assert_eq!(BoredBehavior::Excite.run_time(&config), Some(Duration::from_secs(3)));
        assert_eq!(BoredBehavior::Roll.run_time(&config), Some(Duration::from_secs(2)));
        assert_eq!(BoredBehavior::Blink.run_time(&config), None);
        assert_eq!(BoredBehavior::Blink.routine(), None);
        assert_eq!(BoredBehavior::Roll.mode(), None);
    }
}
