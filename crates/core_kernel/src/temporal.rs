//! Date handling for billing
//!
//! - `Timezone`: the school's local timezone, used to decide which calendar
//!   day "today" is when checking due dates and grace periods
//! - `EffectivePeriod`: the window during which a catalog entry applies

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

use crate::error::CoreError;

/// Timezone wrapper for the billing office
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone(pub Tz);

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timezone::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Timezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Parses an IANA timezone name such as `Asia/Phnom_Penh`
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        Tz::from_str(name)
            .map(Timezone)
            .map_err(|_| CoreError::Configuration(format!("Invalid timezone: {}", name)))
    }

    /// Converts a UTC instant to the local calendar date
    pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        utc.with_timezone(&self.0).date_naive()
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must not be after end {end}")]
    InvalidPeriod {
        start: String,
        end: String,
    },

    #[error("Date arithmetic overflowed: {0}")]
    Overflow(String),
}

/// The dates during which a catalog entry is in effect
///
/// The effective date is inclusive, the expiry date exclusive. A period
/// whose expiry equals its effective date is valid but empty, which is what
/// a template amended on the day it was created looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePeriod {
    pub effective: NaiveDate,
    pub expiry: Option<NaiveDate>,
}

impl EffectivePeriod {
    pub fn new(effective: NaiveDate, expiry: Option<NaiveDate>) -> Result<Self, TemporalError> {
        if let Some(expiry) = expiry {
            if effective > expiry {
                return Err(TemporalError::InvalidPeriod {
                    start: effective.to_string(),
                    end: expiry.to_string(),
                });
            }
        }
        Ok(Self { effective, expiry })
    }

    /// An open-ended period starting on `effective`
    pub fn starting(effective: NaiveDate) -> Self {
        Self {
            effective,
            expiry: None,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.effective && self.expiry.map_or(true, |e| date < e)
    }

    /// Closes the period on `date`, never moving expiry before the start
    pub fn expire_on(&mut self, date: NaiveDate) {
        self.expiry = Some(date.max(self.effective));
    }

    pub fn is_expired_on(&self, date: NaiveDate) -> bool {
        self.expiry.map_or(false, |e| date >= e)
    }
}

/// Adds whole days to a date
pub fn add_days(date: NaiveDate, days: u32) -> Result<NaiveDate, TemporalError> {
    date.checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| TemporalError::Overflow(format!("{} + {} days", date, days)))
}

/// Subtracts whole days from a date
pub fn sub_days(date: NaiveDate, days: u32) -> Result<NaiveDate, TemporalError> {
    date.checked_sub_days(Days::new(u64::from(days)))
        .ok_or_else(|| TemporalError::Overflow(format!("{} - {} days", date, days)))
}

/// Returns the fiscal year a date falls in, named after the calendar year
/// the fiscal year starts in
///
/// # Arguments
///
/// * `date` - Any calendar date
/// * `start_month` - First month of the fiscal year, 1 for January
///
/// # Returns
///
/// The starting calendar year, e.g. 2025 for 2026-03-10 with an August start
pub fn fiscal_year(date: NaiveDate, start_month: u32) -> i32 {
    if date.month() >= start_month {
        date.year()
    } else {
        date.year() - 1
    }
}
