//! The calendar-day key that identifies one unit of work.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors that can occur while parsing a report date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportDateError {
    /// The string is not a `YYYY-MM-DD` date.
    #[error("invalid report date '{0}': expected YYYY-MM-DD")]
    InvalidFormat(String),
}

/// A `YYYY-MM-DD` day key. One unit of work exists per date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportDate(NaiveDate);

impl ReportDate {
    /// Wraps a calendar date.
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Builds a date from its parts, if they form a real day.
    #[must_use]
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// The day before `now`, taken in UTC.
    ///
    /// The host time zone never participates: `2024-03-02T00:30:00+09:00`
    /// is still 2024-03-01 in UTC and therefore yields 2024-02-29.
    #[must_use]
    pub fn yesterday_of(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self(today.checked_sub_days(Days::new(1)).unwrap_or(today))
    }

    /// The following calendar day.
    #[must_use]
    pub fn next_day(self) -> Self {
        Self(self.0.checked_add_days(Days::new(1)).unwrap_or(self.0))
    }

    /// The preceding calendar day.
    #[must_use]
    pub fn previous_day(self) -> Self {
        Self(self.0.checked_sub_days(Days::new(1)).unwrap_or(self.0))
    }

    /// The underlying calendar date.
    #[must_use]
    pub const fn as_naive(self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for ReportDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for ReportDate {
    type Err = ReportDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // chrono accepts unpadded fields; the ledger key must be canonical.
        if trimmed.len() != 10 {
            return Err(ReportDateError::InvalidFormat(s.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(Self)
            .map_err(|_| ReportDateError::InvalidFormat(s.to_string()))
    }
}

impl Serialize for ReportDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReportDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
