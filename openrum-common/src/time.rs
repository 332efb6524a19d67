use std::fmt;
use std::ops::Sub;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A point in time, in full milliseconds since the UNIX epoch.
///
/// The beacon protocol transmits all times as epoch milliseconds, so this is
/// the only clock representation the agent works with. Subtracting two
/// timestamps yields a [`Duration`]; the subtraction saturates at zero
/// because the system clock is subject to skew.
#[derive(Clone, Copy, Default, Eq, Ord, PartialEq, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from the given number of epoch milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[inline]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// Returns the number of milliseconds since the UNIX epoch.
    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp in nanoseconds since the UNIX epoch.
    ///
    /// Event payloads carry their `timestamp` attribute in nanoseconds.
    pub fn as_nanos(self) -> i64 {
        self.0.saturating_mul(1_000_000)
    }

    /// Returns the duration elapsed between `earlier` and this timestamp.
    ///
    /// Returns [`Duration::ZERO`] if `earlier` is in the future.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0).max(0) as u64)
    }

    /// Returns this timestamp shifted into the future by `duration`.
    pub fn add_duration(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as i64))
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        self.duration_since(rhs)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
