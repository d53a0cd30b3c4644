use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{NotificationError, StoreError};
use crate::habit::{Habit, HabitId, ReminderTime};
use crate::kv::KeyValueStore;

pub const REMINDERS_KEY: &str = "tally.reminders.v1";
pub const REMINDER_TITLE: &str = "Tally";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    NotDetermined,
    Denied,
    Authorized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub at: ReminderTime,
    pub repeats: bool,
}

impl ReminderRequest {
    pub fn daily(habit_id: HabitId, body: impl Into<String>, at: ReminderTime) -> Self {
        Self {
            identifier: reminder_identifier(habit_id),
            title: REMINDER_TITLE.to_string(),
            body: body.into(),
            at,
            repeats: true,
        }
    }

    /// First firing strictly after `now`, evaluated in `tz`.
    pub fn next_fire_after<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Option<DateTime<Utc>> {
        let tz = now.timezone();
        let time = NaiveTime::from_hms_opt(self.at.hour(), self.at.minute(), 0)?;
        let today = now.date_naive();
        for offset in 0..=2 {
            let date = today.checked_add_signed(Duration::days(offset))?;
            // Nonexistent local times (DST gaps) fall through to the next day.
            let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() else {
                continue;
            };
            if candidate > now {
                return Some(candidate.with_timezone(&Utc));
            }
        }
        None
    }
}

/// Deterministic reminder identifier for a habit.
pub fn reminder_identifier(id: HabitId) -> String {
    format!("habit.{id}")
}

/// Platform notification service. Implementations wrap whatever the host OS provides.
pub trait NotificationCenter: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;
    /// Prompt for permission. Returns whether it was granted.
    fn request_authorization(&self) -> bool;
    /// Add or replace the pending request with the same identifier.
    fn add(&self, request: ReminderRequest) -> Result<(), NotificationError>;
    fn remove_pending(&self, identifiers: &[String]);
    fn remove_all_pending(&self);
    fn pending(&self) -> Vec<ReminderRequest>;
}

/// Keeps each habit's daily reminder in step with its notify flag and time.
#[derive(Clone)]
pub struct NotificationScheduler {
    center: Arc<dyn NotificationCenter>,
}

impl NotificationScheduler {
    pub fn new(center: Arc<dyn NotificationCenter>) -> Self {
        Self { center }
    }

    pub fn center(&self) -> &Arc<dyn NotificationCenter> {
        &self.center
    }

    /// Ask once; an already-determined answer is returned without prompting.
    pub fn request_authorization_if_needed(&self) -> bool {
        match self.center.authorization_status() {
            AuthorizationStatus::NotDetermined => {
                let granted = self.center.request_authorization();
                tracing::info!(granted, "notification permission requested");
                granted
            }
            AuthorizationStatus::Authorized => true,
            AuthorizationStatus::Denied => false,
        }
    }

    #[tracing::instrument(skip(self, habit), fields(habit = %habit.id()))]
    pub fn sync(&self, habit: &Habit) {
        // Any earlier schedule goes first, whether or not a new one follows.
        self.cancel(habit.id());
        let Some(at) = habit.time.filter(|_| habit.notify) else {
            return;
        };
        if !self.request_authorization_if_needed() {
            tracing::debug!("notifications not authorized, skipping reminder");
            return;
        }
        let request = ReminderRequest::daily(habit.id(), habit.title.clone(), at);
        if let Err(err) = self.center.add(request) {
            tracing::warn!(%err, "failed to schedule reminder");
        }
    }

    pub fn sync_all(&self, habits: &[Habit]) {
        for habit in habits {
            self.sync(habit);
        }
    }

    pub fn cancel(&self, id: HabitId) {
        self.center.remove_pending(&[reminder_identifier(id)]);
    }

    pub fn cancel_many(&self, ids: &[HabitId]) {
        if ids.is_empty() {
            return;
        }
        let identifiers: Vec<String> = ids.iter().copied().map(reminder_identifier).collect();
        self.center.remove_pending(&identifiers);
    }

    pub fn cancel_all(&self) {
        self.center.remove_all_pending();
    }
}

/// Notification center that records pending reminders in a key-value store,
/// answering permission prompts with a configured decision.
pub struct StoredNotificationCenter {
    store: Arc<dyn KeyValueStore>,
    status: Mutex<AuthorizationStatus>,
    grant_on_request: bool,
}

impl StoredNotificationCenter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        status: AuthorizationStatus,
        grant_on_request: bool,
    ) -> Self {
        Self {
            store,
            status: Mutex::new(status),
            grant_on_request,
        }
    }

    fn read(&self) -> Vec<ReminderRequest> {
        match self.store.get(REMINDERS_KEY) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::warn!(%err, "discarding undecodable reminder list");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(%err, "failed to read reminders");
                Vec::new()
            }
        }
    }

    fn write(&self, requests: &[ReminderRequest]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(requests).map_err(|source| StoreError::Encode {
            key: REMINDERS_KEY.to_string(),
            source,
        })?;
        self.store.set(REMINDERS_KEY, &bytes)
    }
}

impl NotificationCenter for StoredNotificationCenter {
    fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.lock()
    }

    fn request_authorization(&self) -> bool {
        let mut status = self.status.lock();
        if *status == AuthorizationStatus::NotDetermined {
            *status = if self.grant_on_request {
                AuthorizationStatus::Authorized
            } else {
                AuthorizationStatus::Denied
            };
        }
        *status == AuthorizationStatus::Authorized
    }

    fn add(&self, request: ReminderRequest) -> Result<(), NotificationError> {
        if self.authorization_status() != AuthorizationStatus::Authorized {
            return Err(NotificationError::PermissionDenied);
        }
        let mut pending = self.read();
        pending.retain(|existing| existing.identifier != request.identifier);
        let identifier = request.identifier.clone();
        pending.push(request);
        self.write(&pending)
            .map_err(|source| NotificationError::Schedule { identifier, source })
    }

    fn remove_pending(&self, identifiers: &[String]) {
        let mut pending = self.read();
        let before = pending.len();
        pending.retain(|existing| !identifiers.contains(&existing.identifier));
        if pending.len() == before {
            return;
        }
        if let Err(err) = self.write(&pending) {
            tracing::warn!(%err, "failed to remove reminders");
        }
    }

    fn remove_all_pending(&self) {
        if let Err(err) = self.store.remove(REMINDERS_KEY) {
            tracing::warn!(%err, "failed to clear reminders");
        }
    }

    fn pending(&self) -> Vec<ReminderRequest> {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use chrono::FixedOffset;

    fn scheduler(status: AuthorizationStatus, grant: bool) -> NotificationScheduler {
        NotificationScheduler::new(Arc::new(StoredNotificationCenter::new(
            Arc::new(MemoryStore::new()),
            status,
            grant,
        )))
    }

    #[test]
    fn sync_schedules_and_replaces_daily_reminder() {
        let scheduler = scheduler(AuthorizationStatus::NotDetermined, true);
        let mut habit =
            Habit::new("Meditate").reminder(Some(ReminderTime::new(7, 30).unwrap()), true);

        scheduler.sync(&habit);
        habit.time = Some(ReminderTime::new(8, 0).unwrap());
        scheduler.sync(&habit);

        let pending = scheduler.center().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identifier, format!("habit.{}", habit.id()));
        assert_eq!(pending[0].at.to_string(), "08:00");
        assert_eq!(pending[0].body, "Meditate");
        assert!(pending[0].repeats);
    }

    #[test]
    fn disabling_notify_removes_existing_reminder() {
        let scheduler = scheduler(AuthorizationStatus::Authorized, true);
        let mut habit =
            Habit::new("Walk").reminder(Some(ReminderTime::new(18, 0).unwrap()), true);
        scheduler.sync(&habit);
        assert_eq!(scheduler.center().pending().len(), 1);

        habit.notify = false;
        scheduler.sync(&habit);
        assert!(scheduler.center().pending().is_empty());
    }

    #[test]
    fn missing_time_cancels_even_when_nothing_is_scheduled() {
        let scheduler = scheduler(AuthorizationStatus::Authorized, true);
        scheduler.sync(&Habit::new("Read").reminder(None, true));
        assert!(scheduler.center().pending().is_empty());
    }

    #[test]
    fn denied_permission_skips_scheduling_silently() {
        let scheduler = scheduler(AuthorizationStatus::NotDetermined, false);
        let habit = Habit::new("Run").reminder(Some(ReminderTime::new(6, 0).unwrap()), true);
        scheduler.sync(&habit);
        assert!(scheduler.center().pending().is_empty());
        assert_eq!(
            scheduler.center().authorization_status(),
            AuthorizationStatus::Denied
        );
    }

    #[test]
    fn resync_after_permission_revoked_drops_old_reminder() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let authorized = NotificationScheduler::new(Arc::new(StoredNotificationCenter::new(
            Arc::clone(&store),
            AuthorizationStatus::Authorized,
            true,
        )));
        let mut habit =
            Habit::new("Stretch").reminder(Some(ReminderTime::new(8, 0).unwrap()), true);
        authorized.sync(&habit);
        assert_eq!(authorized.center().pending().len(), 1);

        let denied = NotificationScheduler::new(Arc::new(StoredNotificationCenter::new(
            store,
            AuthorizationStatus::Denied,
            false,
        )));
        habit.time = Some(ReminderTime::new(9, 0).unwrap());
        denied.sync(&habit);
        assert!(denied.center().pending().is_empty());
        assert!(authorized.center().pending().is_empty());
    }

    #[test]
    fn cancel_many_tolerates_unknown_ids() {
        let scheduler = scheduler(AuthorizationStatus::Authorized, true);
        let a = Habit::new("A").reminder(Some(ReminderTime::new(9, 0).unwrap()), true);
        let b = Habit::new("B").reminder(Some(ReminderTime::new(10, 0).unwrap()), true);
        scheduler.sync_all(&[a.clone(), b.clone()]);

        scheduler.cancel_many(&[a.id(), HabitId::new()]);
        let pending = scheduler.center().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identifier, reminder_identifier(b.id()));

        scheduler.cancel_all();
        assert!(scheduler.center().pending().is_empty());
    }

    #[test]
    fn next_fire_rolls_over_to_tomorrow() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let request = ReminderRequest::daily(HabitId::new(), "x", ReminderTime::new(7, 0).unwrap());

        let before = tz.with_ymd_and_hms(2024, 5, 1, 6, 59, 0).unwrap();
        let fire = request.next_fire_after(before).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2024, 5, 1, 5, 0, 0).unwrap());

        let after = tz.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        let fire = request.next_fire_after(after).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2024, 5, 2, 5, 0, 0).unwrap());
    }
}
