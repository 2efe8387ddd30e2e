//! Acquisition timestamps.
//!
//! Every transfer is stamped once, at completion, with both a monotonic instant
//! and the wall-clock time. Ordering and intervals use the monotonic part only;
//! the wall-clock part is what file writers persist alongside frame counters.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Completion time of one transfer.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    /// Monotonic clock reading, used for ordering.
    pub monotonic: Instant,
    /// Wall-clock time captured together with `monotonic`.
    pub wall: DateTime<Utc>,
}

impl Timestamp {
    /// Stamp the current moment.
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Utc::now(),
        }
    }

    /// Monotonic time elapsed since `earlier`, saturating at zero.
    pub fn since(&self, earlier: &Timestamp) -> Duration {
        self.monotonic.saturating_duration_since(earlier.monotonic)
    }

    /// Time elapsed since this stamp was taken.
    pub fn elapsed(&self) -> Duration {
        self.monotonic.elapsed()
    }

    /// Wall-clock time as fractional seconds since the Unix epoch.
    pub fn unix_seconds(&self) -> f64 {
        self.wall.timestamp() as f64 + f64::from(self.wall.timestamp_subsec_nanos()) * 1e-9
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.monotonic == other.monotonic
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.monotonic.cmp(&other.monotonic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_follows_monotonic_clock() {
        let first = Timestamp::now();
        std::thread::sleep(Duration::from_millis(2));
        let second = Timestamp::now();

        assert!(second > first);
        assert!(second.since(&first) >= Duration::from_millis(2));
        assert_eq!(first.since(&second), Duration::ZERO);
    }

    #[test]
    fn test_unix_seconds_matches_wall_clock() {
        let ts = Timestamp::now();
        let expected = ts.wall.timestamp() as f64;
        assert!((ts.unix_seconds() - expected).abs() < 1.0);
    }
}
