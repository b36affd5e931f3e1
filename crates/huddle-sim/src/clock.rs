use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Configuration for the simulated wall clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Base timestamp in milliseconds since the Unix epoch.
    pub base_millis: i64,
    /// Wall time that passes per simulation round.
    pub tick_millis: i64,
    /// Maximum absolute skew assigned to a client clock.
    pub max_abs_skew_millis: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            base_millis: 1_780_000_000_000,
            tick_millis: 100,
            max_abs_skew_millis: 250,
        }
    }
}

impl ClockConfig {
    /// The server clock: no skew.
    #[must_use]
    pub const fn server(&self) -> SimulatedClock {
        SimulatedClock {
            base_millis: self.base_millis,
            tick_millis: self.tick_millis,
            skew_millis: 0,
        }
    }

    /// A client clock with a random constant skew.
    #[must_use]
    pub fn client(&self, rng: &mut DeterministicRng) -> SimulatedClock {
        let span = u64::try_from(self.max_abs_skew_millis.max(0)).unwrap_or(0);
        let raw = i64::try_from(rng.next_bounded(span.saturating_mul(2).saturating_add(1)))
            .unwrap_or(0);
        SimulatedClock {
            base_millis: self.base_millis,
            tick_millis: self.tick_millis,
            skew_millis: raw - self.max_abs_skew_millis.max(0),
        }
    }
}

/// Round-driven wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedClock {
    base_millis: i64,
    tick_millis: i64,
    skew_millis: i64,
}

impl SimulatedClock {
    #[must_use]
    pub const fn skew_millis(&self) -> i64 {
        self.skew_millis
    }

    /// Wall time at `round`.
    #[must_use]
    pub fn now(&self, round: u64) -> DateTime<Utc> {
        let round = i64::try_from(round).unwrap_or(i64::MAX);
        let millis = self
            .base_millis
            .saturating_add(self.skew_millis)
            .saturating_add(self.tick_millis.saturating_mul(round));
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC - Duration::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_clock_advances_one_tick_per_round() {
        let clock = ClockConfig::default().server();
        assert_eq!(clock.now(3) - clock.now(2), Duration::milliseconds(100));
    }

    #[test]
    fn client_skew_stays_within_bounds() {
        let config = ClockConfig::default();
        let mut rng = DeterministicRng::new(42);
        for _ in 0..100 {
            let clock = config.client(&mut rng);
            assert!(clock.skew_millis().abs() <= config.max_abs_skew_millis);
        }
    }
}
