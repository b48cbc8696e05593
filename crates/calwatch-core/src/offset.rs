//! Reminder offsets and trigger time arithmetic.
//!
//! A reminder is requested as "N seconds before the event starts". The
//! subscription API allows the caller to omit N entirely; an omitted offset
//! fires at the start time like an explicit `0`, but it is tracked as its own
//! reminder so that it can be told apart from a subscription that passed `0`.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when validating a requested offset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetError {
    /// The caller asked for a reminder after the event started.
    #[error("expected offset to be a positive number of seconds, got {0}")]
    Negative(i64),

    /// The offset does not fit in the supported range.
    #[error("offset of {0} seconds is out of range")]
    OutOfRange(i64),
}

/// Number of seconds before an event's start at which a reminder fires.
///
/// `Offset::absent()` and `Offset::seconds(0)` fire at the same instant but
/// compare unequal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(Option<u32>);

impl Offset {
    /// An offset that was not provided by the subscriber.
    pub const fn absent() -> Self {
        Self(None)
    }

    /// An explicit offset in seconds.
    pub const fn seconds(secs: u32) -> Self {
        Self(Some(secs))
    }

    /// Validates an offset as received from a subscriber.
    pub fn from_request(value: Option<i64>) -> Result<Self, OffsetError> {
        match value {
            None => Ok(Self::absent()),
            Some(v) if v < 0 => Err(OffsetError::Negative(v)),
            Some(v) => u32::try_from(v)
                .map(Self::seconds)
                .map_err(|_| OffsetError::OutOfRange(v)),
        }
    }

    /// Returns the raw value, `None` when the subscriber omitted it.
    pub fn get(self) -> Option<u32> {
        self.0
    }

    /// Returns true when the subscriber omitted the offset.
    pub fn is_absent(self) -> bool {
        self.0.is_none()
    }

    /// Effective number of seconds, treating an absent offset as zero.
    pub fn as_secs(self) -> u32 {
        self.0.unwrap_or(0)
    }
}

impl From<Option<u32>> for Offset {
    fn from(value: Option<u32>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(secs) => write!(f, "{}s", secs),
            None => write!(f, "absent"),
        }
    }
}

/// Computes when a reminder for `offset` should fire for an event starting at `start`.
pub fn trigger_time(start: DateTime<Utc>, offset: Offset) -> DateTime<Utc> {
    start - Duration::seconds(i64::from(offset.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn trigger_time_subtracts_offset() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 9, 55, 0).unwrap();
        assert_eq!(trigger_time(ten_am(), Offset::seconds(300)), expected);

        let millis = ten_am().timestamp_millis() - 600 * 1000;
        assert_eq!(
            trigger_time(ten_am(), Offset::seconds(600)).timestamp_millis(),
            millis
        );
    }

    #[test]
    fn absent_offset_fires_at_start() {
        assert_eq!(trigger_time(ten_am(), Offset::absent()), ten_am());
        assert_eq!(
            trigger_time(ten_am(), Offset::absent()),
            trigger_time(ten_am(), Offset::seconds(0))
        );
    }

    #[test]
    fn absent_and_zero_are_distinct() {
        assert_ne!(Offset::absent(), Offset::seconds(0));
        assert!(Offset::absent().is_absent());
        assert!(!Offset::seconds(0).is_absent());
        assert_eq!(Offset::absent().as_secs(), 0);
    }

    #[test]
    fn from_request_validates() {
        assert_eq!(Offset::from_request(None), Ok(Offset::absent()));
        assert_eq!(Offset::from_request(Some(0)), Ok(Offset::seconds(0)));
        assert_eq!(Offset::from_request(Some(300)), Ok(Offset::seconds(300)));
        assert_eq!(
            Offset::from_request(Some(-1)),
            Err(OffsetError::Negative(-1))
        );
        assert_eq!(
            Offset::from_request(Some(i64::from(u32::MAX) + 1)),
            Err(OffsetError::OutOfRange(i64::from(u32::MAX) + 1))
        );
    }

    #[test]
    fn serde_is_transparent() {
        assert_eq!(serde_json::to_string(&Offset::seconds(60)).unwrap(), "60");
        assert_eq!(serde_json::to_string(&Offset::absent()).unwrap(), "null");
        let parsed: Offset = serde_json::from_str("null").unwrap();
        assert!(parsed.is_absent());
    }

    #[test]
    fn display() {
        assert_eq!(Offset::seconds(90).to_string(), "90s");
        assert_eq!(Offset::absent().to_string(), "absent");
    }
}
