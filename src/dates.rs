// Calendar dates used for every comparison in the rebooking logic.
// All dates coming from the command line or the portal pass through `CalendarDate::parse`
// so ordering and arithmetic happen on one normalized representation (UTC calendar day).

use std::{fmt, str::FromStr};

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateError {
    #[error("Invalid date format: \"{0}\". Please use YYYY-MM-DD format.")]
    Unparseable(String),

    #[error("Date arithmetic out of range: {date} minus {days} days")]
    OutOfRange { date: String, days: u32 },
}

// Plain calendar formats tried in order after the ISO/RFC forms
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// A UTC calendar day, displayed and serialized as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Normalizes any date-like text to a calendar day.
    ///
    /// Timestamps carrying an offset are converted to UTC before the day is taken.
    pub fn parse(input: &str) -> Result<Self, DateError> {
        let s = input.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self(dt.with_timezone(&Utc).date_naive()));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
            return Ok(Self(dt.with_timezone(&Utc).date_naive()));
        }
        for fmt in DATE_TIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Self(dt.date()));
            }
        }
        for fmt in DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Ok(Self(d));
            }
        }

        Err(DateError::Unparseable(input.to_string()))
    }

    /// The latest acceptable replacement date: `self` minus `days` calendar days.
    pub fn threshold(&self, days: u32) -> Result<Self, DateError> {
        self.0
            .checked_sub_days(Days::new(u64::from(days)))
            .map(Self)
            .ok_or_else(|| DateError::OutOfRange {
                date: self.to_string(),
                days,
            })
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for CalendarDate {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CalendarDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CalendarDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Threshold of a raw date string, normalizing it first.
pub fn threshold_date(date: &str, days: u32) -> Result<CalendarDate, DateError> {
    CalendarDate::parse(date)?.threshold(days)
}
