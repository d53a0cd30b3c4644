use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// A calendar day in the proleptic Gregorian calendar, rendered as `YYYY-MM-DD`.
///
/// Formatting never consults the process locale, so a key written by one
/// process is byte-identical to the key another process computes for the
/// same day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The key `days` before this one. Saturates at the calendar bounds.
    pub fn days_before(&self, days: i64) -> Self {
        Self(self.0.checked_sub_signed(Duration::days(days)).unwrap_or(NaiveDate::MIN))
    }

    pub fn days_after(&self, days: i64) -> Self {
        Self(self.0.checked_add_signed(Duration::days(days)).unwrap_or(NaiveDate::MAX))
    }

    /// The `count` keys ending at (and including) this day, oldest first.
    pub fn trailing(&self, count: usize) -> Vec<DayKey> {
        (0..count)
            .rev()
            .map(|offset| self.days_before(offset as i64))
            .collect()
    }
}

impl From<NaiveDate> for DayKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), DAY_KEY_FORMAT).map(Self)
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Source of "now" for every derived computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The calendar day an instant falls on.
    fn day_of(&self, instant: DateTime<Utc>) -> DayKey;

    fn today(&self) -> DayKey {
        self.day_of(self.now())
    }
}

/// Wall clock; days are resolved in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn day_of(&self, instant: DateTime<Utc>) -> DayKey {
        DayKey(instant.with_timezone(&Local).date_naive())
    }
}

/// A clock pinned to one instant, resolving days in UTC.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Noon UTC of the given day.
    pub fn on(day: DayKey) -> Self {
        let noon = day
            .date()
            .and_hms_opt(12, 0, 0)
            .unwrap_or_default()
            .and_utc();
        Self { now: noon }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn day_of(&self, instant: DateTime<Utc>) -> DayKey {
        DayKey(instant.date_naive())
    }
}
