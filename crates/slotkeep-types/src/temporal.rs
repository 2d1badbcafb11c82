use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock save timestamp in milliseconds since the UNIX epoch.
///
/// Timestamps order saves for last-writer-wins resolution and appear in cloud
/// object keys, so they are plain integers with a total order rather than
/// platform clock types.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from explicit milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a [`SystemTime`]; times before the epoch clamp to zero.
    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(millis)
    }

    /// The zero timestamp (epoch).
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Absolute distance between two timestamps.
    pub fn abs_diff(&self, other: &Self) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }

    /// Returns `true` if `other` lies within `window` of this timestamp
    /// (inclusive).
    pub fn within(&self, other: &Self, window: Duration) -> bool {
        self.abs_diff(other) <= window
    }

    /// RFC 3339 rendering for human-facing output.
    pub fn to_rfc3339(&self) -> String {
        match chrono::DateTime::from_timestamp_millis(self.0 as i64) {
            Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            None => format!("{}ms", self.0),
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_by_millis() {
        assert!(Timestamp::from_millis(100) < Timestamp::from_millis(200));
        assert_eq!(Timestamp::zero(), Timestamp::default());
    }

    #[test]
    fn now_is_reasonable() {
        // After 2020-01-01.
        assert!(Timestamp::now().as_millis() > 1_577_836_800_000);
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(4_500);
        assert_eq!(a.abs_diff(&b), Duration::from_millis(3_500));
        assert_eq!(b.abs_diff(&a), Duration::from_millis(3_500));
    }

    #[test]
    fn within_window_is_inclusive() {
        let a = Timestamp::from_millis(10_000);
        let b = Timestamp::from_millis(12_000);
        assert!(a.within(&b, Duration::from_secs(2)));
        assert!(!a.within(&b, Duration::from_millis(1_999)));
    }

    #[test]
    fn rfc3339_rendering() {
        let ts = Timestamp::from_millis(0);
        assert_eq!(ts.to_rfc3339(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&Timestamp::from_millis(42)).unwrap();
        assert_eq!(json, "42");
    }
}
