//! Timestamps and clocks.
//!
//! `Timestamp` is a millisecond UTC instant. Its total ordering is the only
//! conflict arbitration rule in the system: the version of a record with the
//! greater `updated_at` wins, and ties are broken in favor of the remote
//! value by the reconciliation layer.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp from raw milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Converts from a chrono UTC datetime.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    /// Converts to a chrono UTC datetime.
    ///
    /// Returns `None` for values outside chrono's representable range.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// Absolute distance to another timestamp, in milliseconds.
    #[must_use]
    pub const fn abs_diff_millis(self, other: Self) -> i64 {
        (self.0 - other.0).abs()
    }

    /// Returns true if `self` is strictly newer than `other`.
    #[must_use]
    pub const fn is_newer_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "ts:{}", self.0),
        }
    }
}

/// A source of the current time.
///
/// The engine stamps optimistic writes through this trait so that timestamp
/// ordering is testable without sleeping.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_datetime(Utc::now())
    }
}

/// A manually stepped clock for tests.
///
/// Every call to [`Clock::now`] advances the clock by one millisecond, so
/// two consecutive writes never collide on the same timestamp unless a test
/// arranges it explicitly via [`ManualClock::set`].
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<i64>,
}

impl ManualClock {
    /// Creates a clock starting at the given millisecond instant.
    #[must_use]
    pub fn starting_at(millis: i64) -> Self {
        Self {
            now: Mutex::new(millis),
        }
    }

    /// Advances the clock by `millis` milliseconds.
    pub fn advance(&self, millis: i64) {
        *self.now.lock() += millis;
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, millis: i64) {
        *self.now.lock() = millis;
    }

    /// Reads the current instant without ticking.
    #[must_use]
    pub fn peek(&self) -> Timestamp {
        Timestamp::from_millis(*self.now.lock())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let mut now = self.now.lock();
        *now += 1;
        Timestamp::from_millis(*now)
    }
}
