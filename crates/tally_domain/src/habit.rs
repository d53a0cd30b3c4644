use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::day::{Clock, DayKey};
use crate::error::DomainError;

/// Opaque habit identity. Assigned once at creation and never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HabitId(Uuid);

impl HabitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for HabitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HabitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for HabitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawReminderTime")]
pub struct ReminderTime {
    hour: u32,
    minute: u32,
}

#[derive(Deserialize)]
struct RawReminderTime {
    hour: u32,
    minute: u32,
}

impl TryFrom<RawReminderTime> for ReminderTime {
    type Error = DomainError;

    fn try_from(raw: RawReminderTime) -> Result<Self, Self::Error> {
        Self::new(raw.hour, raw.minute)
    }
}

impl ReminderTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, DomainError> {
        if hour > 23 || minute > 59 {
            return Err(DomainError::InvalidTime { hour, minute });
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }
}

impl fmt::Display for ReminderTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ReminderTime {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DomainError::MalformedTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(malformed)?;
        let hour = hour.trim().parse().map_err(|_| malformed())?;
        let minute = minute.trim().parse().map_err(|_| malformed())?;
        Self::new(hour, minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    id: HabitId,
    pub title: String,
    #[serde(default)]
    pub time: Option<ReminderTime>,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default, deserialize_with = "lenient_days")]
    completed_days: BTreeSet<DayKey>,
    /// Superseded by `completed_days`; still written for older readers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_completed_on: Option<DateTime<Utc>>,
}

impl Habit {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(HabitId::new(), title)
    }

    pub fn with_id(id: HabitId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            time: None,
            notify: false,
            notes: String::new(),
            completed_days: BTreeSet::new(),
            last_completed_on: None,
        }
    }

    pub fn reminder(mut self, time: Option<ReminderTime>, notify: bool) -> Self {
        self.time = time;
        self.notify = notify;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_completed_days(mut self, days: impl IntoIterator<Item = DayKey>) -> Self {
        self.completed_days.extend(days);
        self
    }

    pub fn with_last_completed_on(mut self, instant: Option<DateTime<Utc>>) -> Self {
        self.last_completed_on = instant;
        self
    }

    pub fn id(&self) -> HabitId {
        self.id
    }

    pub fn completed_days(&self) -> &BTreeSet<DayKey> {
        &self.completed_days
    }

    pub fn last_completed_on(&self) -> Option<DateTime<Utc>> {
        self.last_completed_on
    }

    /// Title with surrounding whitespace removed, `None` when nothing is left.
    pub fn display_title(&self) -> Option<&str> {
        let trimmed = self.title.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn is_completed_on(&self, day: DayKey) -> bool {
        self.completed_days.contains(&day)
    }

    pub fn is_completed_today(&self, clock: &dyn Clock) -> bool {
        self.is_completed_on(clock.today())
    }

    /// Flips today's completion and returns the new state.
    pub fn toggle_today(&mut self, clock: &dyn Clock) -> bool {
        let today = clock.today();
        if self.completed_days.remove(&today) {
            self.last_completed_on = None;
            false
        } else {
            self.completed_days.insert(today);
            self.last_completed_on = Some(clock.now());
            true
        }
    }

    pub fn mark(&mut self, day: DayKey) {
        self.completed_days.insert(day);
    }

    pub fn unmark(&mut self, day: DayKey, clock: &dyn Clock) {
        self.completed_days.remove(&day);
        if day == clock.today() {
            self.last_completed_on = None;
        }
    }

    /// Folds the legacy completion timestamp into the day set.
    /// Returns true when a day was added.
    pub fn migrate_last_completed(&mut self, clock: &dyn Clock) -> bool {
        match self.last_completed_on {
            Some(instant) => self.completed_days.insert(clock.day_of(instant)),
            None => false,
        }
    }
}

fn lenient_days<'de, D>(deserializer: D) -> Result<BTreeSet<DayKey>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw
        .iter()
        .filter_map(|entry| match entry.parse::<DayKey>() {
            Ok(day) => Some(day),
            Err(err) => {
                tracing::warn!(entry = %entry, %err, "dropping malformed day key");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::FixedClock;

    fn day(y: i32, m: u32, d: u32) -> DayKey {
        DayKey::from_ymd(y, m, d).unwrap()
    }

    #[test]
    fn double_toggle_restores_completion_history() {
        let clock = FixedClock::on(day(2024, 5, 10));
        let mut habit = Habit::new("Stretch").with_completed_days([day(2024, 5, 9)]);
        let before = habit.completed_days().clone();

        assert!(habit.toggle_today(&clock));
        assert!(habit.is_completed_today(&clock));
        assert!(habit.last_completed_on().is_some());

        assert!(!habit.toggle_today(&clock));
        assert_eq!(habit.completed_days(), &before);
        assert!(habit.last_completed_on().is_none());
    }

    #[test]
    fn migrates_legacy_timestamp_once() {
        let clock = FixedClock::on(day(2024, 5, 10));
        let legacy = day(2024, 5, 1).date().and_hms_opt(8, 30, 0).unwrap().and_utc();
        let mut habit = Habit::new("Read").with_last_completed_on(Some(legacy));

        assert!(habit.migrate_last_completed(&clock));
        assert!(habit.is_completed_on(day(2024, 5, 1)));
        assert!(!habit.migrate_last_completed(&clock));
    }

    #[test]
    fn unmark_today_clears_legacy_timestamp() {
        let today = day(2024, 5, 10);
        let clock = FixedClock::on(today);
        let mut habit = Habit::new("Walk");
        habit.toggle_today(&clock);
        habit.mark(day(2024, 5, 8));

        habit.unmark(day(2024, 5, 8), &clock);
        assert!(habit.last_completed_on().is_some());

        habit.unmark(today, &clock);
        assert!(habit.last_completed_on().is_none());
        assert!(habit.completed_days().is_empty());
    }

    #[test]
    fn decodes_camel_case_payload_and_skips_bad_days() {
        let raw = r#"{
            "id": "6f1c2a8e-58a4-4c38-9c55-0c7ab6a8e0f1",
            "title": "Water",
            "time": {"hour": 7, "minute": 45},
            "notify": true,
            "notes": "",
            "completedDays": ["2024-01-01", "not-a-day", "2024-01-02"]
        }"#;
        let habit: Habit = serde_json::from_str(raw).unwrap();
        assert_eq!(habit.id().to_string(), "6f1c2a8e-58a4-4c38-9c55-0c7ab6a8e0f1");
        assert_eq!(habit.time, Some(ReminderTime::new(7, 45).unwrap()));
        assert_eq!(habit.completed_days().len(), 2);
    }

    #[test]
    fn reminder_time_parses_and_validates() {
        assert_eq!("06:05".parse::<ReminderTime>().unwrap().to_string(), "06:05");
        assert!("24:00".parse::<ReminderTime>().is_err());
        assert!("7".parse::<ReminderTime>().is_err());
    }

    #[test]
    fn reminder_time_errors_name_the_bad_input() {
        assert_eq!(
            "7".parse::<ReminderTime>(),
            Err(DomainError::MalformedTime("7".into()))
        );
        assert_eq!(
            "ab:cd".parse::<ReminderTime>().unwrap_err().to_string(),
            "`ab:cd` is not a reminder time, expected HH:MM"
        );
        assert_eq!(
            "24:00".parse::<ReminderTime>(),
            Err(DomainError::InvalidTime { hour: 24, minute: 0 })
        );
    }

    #[test]
    fn display_title_filters_blank_titles() {
        assert_eq!(Habit::new("  Yoga ").display_title(), Some("Yoga"));
        assert_eq!(Habit::new("   ").display_title(), None);
    }
}
