//! Dwell-time accounting
//!
//! Detectors poll at irregular cadence. Each ingestion call credits every
//! participant it carries with one shared increment derived from the gap since
//! the meeting's last recorded snapshot.

use crate::config::AccumulatorConfig;
use chrono::{DateTime, Utc};

/// How an increment was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// No prior snapshot in the meeting
    Initial,
    /// Delta within the regular window, credited as-is
    Regular,
    /// Long silence; credit capped
    Gap,
    /// Zero or negative delta; default credited
    Anomalous,
}

/// Seconds credited to each participant for one ingestion call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIncrement {
    pub seconds: u64,
    pub kind: TickKind,
    /// Whole seconds since the last snapshot, when one exists
    pub delta_secs: Option<i64>,
}

/// Increment policy for one meeting-wide clock tick
#[derive(Debug, Clone)]
pub struct TimeAccumulator {
    config: AccumulatorConfig,
}

impl Default for TimeAccumulator {
    fn default() -> Self {
        Self::new(AccumulatorConfig::default())
    }
}

impl TimeAccumulator {
    pub fn new(config: AccumulatorConfig) -> Self {
        Self { config }
    }

    /// Compute the increment for a call at `now` given the last snapshot time
    pub fn increment(&self, last_snapshot: Option<DateTime<Utc>>, now: DateTime<Utc>) -> TimeIncrement {
        let Some(last) = last_snapshot else {
            return TimeIncrement {
                seconds: self.config.default_increment_secs,
                kind: TickKind::Initial,
                delta_secs: None,
            };
        };

        // Truncated toward zero, like integer division of milliseconds
        let delta = (now - last).num_milliseconds() / 1000;
        let max_regular = self.config.max_regular_gap_secs as i64;

        let (seconds, kind) = if (1..=max_regular).contains(&delta) {
            (delta as u64, TickKind::Regular)
        } else if delta > max_regular {
            log::warn!(
                "Large time gap detected: {}s, capping increment at {}s",
                delta,
                self.config.gap_increment_secs
            );
            (self.config.gap_increment_secs, TickKind::Gap)
        } else {
            log::warn!(
                "Unusual time increment detected: {}s, using default: {}s",
                delta,
                self.config.default_increment_secs
            );
            (self.config.default_increment_secs, TickKind::Anomalous)
        };

        TimeIncrement {
            seconds,
            kind,
            delta_secs: Some(delta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_initial_uses_default() {
        let inc = TimeAccumulator::default().increment(None, t0());
        assert_eq!(inc.seconds, 5);
        assert_eq!(inc.kind, TickKind::Initial);
        assert_eq!(inc.delta_secs, None);
    }

    #[test]
    fn test_regular_window_is_exact() {
        let acc = TimeAccumulator::default();
        for delta in 1..=10 {
            let inc = acc.increment(Some(t0()), t0() + Duration::seconds(delta));
            assert_eq!(inc.seconds, delta as u64);
            assert_eq!(inc.kind, TickKind::Regular);
        }
    }

    #[test]
    fn test_gap_is_capped() {
        let acc = TimeAccumulator::default();
        let inc = acc.increment(Some(t0()), t0() + Duration::seconds(11));
        assert_eq!(inc.seconds, 1);
        assert_eq!(inc.kind, TickKind::Gap);

        let inc = acc.increment(Some(t0()), t0() + Duration::hours(3));
        assert_eq!(inc.seconds, 1);
    }

    #[test]
    fn test_anomalous_deltas() {
        let acc = TimeAccumulator::default();

        let inc = acc.increment(Some(t0()), t0());
        assert_eq!((inc.seconds, inc.kind), (5, TickKind::Anomalous));

        let inc = acc.increment(Some(t0()), t0() + Duration::milliseconds(999));
        assert_eq!((inc.seconds, inc.kind), (5, TickKind::Anomalous));

        let inc = acc.increment(Some(t0()), t0() - Duration::seconds(30));
        assert_eq!((inc.seconds, inc.kind), (5, TickKind::Anomalous));
        assert_eq!(inc.delta_secs, Some(-30));
    }

    #[test]
    fn test_subsecond_truncation() {
        let acc = TimeAccumulator::default();
        let inc = acc.increment(Some(t0()), t0() + Duration::milliseconds(7_900));
        assert_eq!(inc.seconds, 7);
    }

    #[test]
    fn test_increment_domain() {
        let acc = TimeAccumulator::default();
        for offset in -20..200 {
            let inc = acc.increment(Some(t0()), t0() + Duration::milliseconds(offset * 250));
            assert!((1..=10).contains(&inc.seconds), "offset {offset}: {inc:?}");
            if let Some(delta) = inc.delta_secs {
                if (1..=10).contains(&delta) {
                    assert_eq!(inc.seconds, delta as u64);
                }
            }
        }
    }
}
