//! Schedule specification for logical time series.
//!
//! Each series writes at a fixed cadence derived from its schedule
//! entry. The range query engine uses the cadence to estimate how many
//! records a time window should hold, which bounds how many segments it
//! walks.

use serde::{Deserialize, Serialize};

/// Externally supplied list of `(unit, cadence)` pairs. The unit is the
/// leading component of a log key (after an optional `stat-` prefix),
/// the cadence is the series' inter-write interval in milliseconds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schedule {
    entries: Vec<(String, u64)>,
}

impl Schedule {
    #[must_use]
    pub fn new(entries: Vec<(String, u64)>) -> Self {
        Self { entries }
    }

    /// Cadence in milliseconds for a log key, if its unit is scheduled.
    ///
    /// A key like `stat-5m-t-miner` matches the entry for unit `5m`.
    #[must_use]
    pub fn cadence_for(&self, log_key: &str) -> Option<u64> {
        let key = log_key.strip_prefix("stat-").unwrap_or(log_key);
        self.entries
            .iter()
            .find(|(unit, _)| key == unit || key.starts_with(&format!("{unit}-")))
            .map(|(_, cadence)| *cadence)
    }

    /// Estimate how many records the series holds in `[start, end]`.
    ///
    /// `end` defaults to `now`, `start` to the epoch. Returns 0 when the
    /// key's unit is not scheduled, leaving the caller to fall back to
    /// its limit alone.
    #[must_use]
    pub fn expected_count(
        &self,
        start: Option<u64>,
        end: Option<u64>,
        log_key: &str,
        now: u64,
    ) -> u64 {
        let Some(cadence) = self.cadence_for(log_key) else {
            return 0;
        };
        if cadence == 0 {
            return 0;
        }
        let end = end.unwrap_or(now);
        let start = start.unwrap_or(0);
        if end <= start {
            return 1;
        }
        (end - start).div_ceil(cadence) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN5: u64 = 5 * 60 * 1000;

    fn schedule() -> Schedule {
        Schedule::new(vec![("5m".into(), MIN5), ("rtd".into(), 5_000)])
    }

    #[test]
    fn test_cadence_lookup_strips_stat_prefix() {
        let s = schedule();
        assert_eq!(s.cadence_for("stat-5m"), Some(MIN5));
        assert_eq!(s.cadence_for("stat-5m-t-miner"), Some(MIN5));
        assert_eq!(s.cadence_for("rtd-t-miner"), Some(5_000));
        assert_eq!(s.cadence_for("stat-1h"), None);
    }

    #[test]
    fn test_expected_count_in_window() {
        let s = schedule();
        // 8 cadence ticks fit in a 7-tick-wide window plus both ends
        let start = 1_000_000;
        let end = start + 7 * MIN5;
        assert_eq!(s.expected_count(Some(start), Some(end), "stat-5m", end), 8);
    }

    #[test]
    fn test_expected_count_defaults() {
        let s = schedule();
        let now = 10 * MIN5;
        // no start: from epoch to end
        assert_eq!(
            s.expected_count(None, Some(2 * MIN5), "stat-5m", now),
            2 + 1
        );
        // no end: up to now
        assert_eq!(
            s.expected_count(Some(7 * MIN5), None, "stat-5m", now),
            3 + 1
        );
    }

    #[test]
    fn test_expected_count_unknown_unit() {
        let s = schedule();
        assert_eq!(s.expected_count(Some(0), Some(MIN5), "stat-1h", MIN5), 0);
    }

    #[test]
    fn test_expected_count_degenerate_window() {
        let s = schedule();
        assert_eq!(
            s.expected_count(Some(MIN5), Some(MIN5), "stat-5m", MIN5),
            1
        );
    }
}
