use std::sync::Arc;

use anyhow::{Context, Result};

use crate::day::{Clock, SystemClock};
use crate::error::DomainError;
use crate::habit::{Habit, HabitId, ReminderTime};
use crate::notifications::NotificationScheduler;
use crate::stats::{self, HabitStats};
use crate::store::HabitsStoring;
use crate::widget::WidgetPublisher;

/// Owns the live habit collection and the mutate → persist → publish path.
pub struct HabitService {
    habits: Vec<Habit>,
    store: Arc<dyn HabitsStoring>,
    scheduler: Option<NotificationScheduler>,
    publisher: Option<WidgetPublisher>,
    clock: Arc<dyn Clock>,
}

pub struct HabitServiceBuilder {
    store: Arc<dyn HabitsStoring>,
    scheduler: Option<NotificationScheduler>,
    publisher: Option<WidgetPublisher>,
    clock: Arc<dyn Clock>,
}

impl HabitServiceBuilder {
    pub fn new(store: Arc<dyn HabitsStoring>) -> Self {
        Self {
            store,
            scheduler: None,
            publisher: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_scheduler(mut self, scheduler: NotificationScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_publisher(mut self, publisher: WidgetPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the collection, folding legacy completion timestamps into the
    /// day sets. Persists once if the fold changed anything.
    pub fn build(self) -> Result<HabitService> {
        let mut habits = self.store.load();
        let mut service = HabitService {
            habits: Vec::new(),
            store: self.store,
            scheduler: self.scheduler,
            publisher: self.publisher,
            clock: self.clock,
        };
        let mut migrated = 0usize;
        for habit in &mut habits {
            if habit.migrate_last_completed(service.clock.as_ref()) {
                migrated += 1;
            }
        }
        if migrated > 0 {
            tracing::info!(migrated, "migrated legacy completion timestamps");
            service.commit(habits)?;
        } else {
            service.habits = habits;
        }
        Ok(service)
    }
}

impl HabitService {
    pub fn builder(store: Arc<dyn HabitsStoring>) -> HabitServiceBuilder {
        HabitServiceBuilder::new(store)
    }

    pub fn habits(&self) -> &[Habit] {
        &self.habits
    }

    pub fn habit(&self, id: HabitId) -> Option<&Habit> {
        self.habits.iter().find(|h| h.id() == id)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Replace the in-memory collection with what the store holds now.
    pub fn reload(&mut self) {
        self.habits = self.store.load();
        tracing::debug!(count = self.habits.len(), "habits reloaded from store");
    }

    pub fn add(
        &mut self,
        title: &str,
        time: Option<ReminderTime>,
        notify: bool,
        notes: &str,
    ) -> Result<HabitId> {
        if title.trim().is_empty() {
            return Err(DomainError::EmptyTitle.into());
        }
        let habit = Habit::new(title).reminder(time, notify).with_notes(notes);
        let id = habit.id();
        let mut next = self.habits.clone();
        next.push(habit);
        self.commit(next)?;
        if let (Some(scheduler), Some(habit)) = (&self.scheduler, self.habit(id)) {
            scheduler.sync(habit);
        }
        tracing::info!(%id, "habit added");
        Ok(id)
    }

    /// Flip today's completion. `None` when the id is unknown.
    pub fn toggle(&mut self, id: HabitId) -> Result<Option<bool>> {
        let Some(index) = self.position(id) else {
            return Ok(None);
        };
        let mut next = self.habits.clone();
        let completed = next[index].toggle_today(self.clock.as_ref());
        self.commit(next)?;
        Ok(Some(completed))
    }

    /// Replace the stored habit that shares `habit`'s id. Returns false,
    /// changing nothing, when no such habit exists.
    pub fn update(&mut self, habit: Habit) -> Result<bool> {
        let Some(index) = self.position(habit.id()) else {
            return Ok(false);
        };
        let mut next = self.habits.clone();
        next[index] = habit;
        self.commit(next)?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.sync(&self.habits[index]);
        }
        Ok(true)
    }

    pub fn delete(&mut self, id: HabitId) -> Result<bool> {
        let Some(index) = self.position(id) else {
            return Ok(false);
        };
        let mut next = self.habits.clone();
        next.remove(index);
        self.commit(next)?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel(id);
        }
        tracing::info!(%id, "habit deleted");
        Ok(true)
    }

    /// Delete every listed habit that exists. Returns the ids actually removed.
    pub fn delete_many(&mut self, ids: &[HabitId]) -> Result<Vec<HabitId>> {
        let removed: Vec<HabitId> = self
            .habits
            .iter()
            .map(Habit::id)
            .filter(|id| ids.contains(id))
            .collect();
        if removed.is_empty() {
            return Ok(removed);
        }
        let next: Vec<Habit> = self
            .habits
            .iter()
            .filter(|h| !removed.contains(&h.id()))
            .cloned()
            .collect();
        self.commit(next)?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel_many(&removed);
        }
        Ok(removed)
    }

    pub fn stats(&self, window: usize) -> HabitStats {
        stats::compute_stats(&self.habits, window, self.clock.today())
    }

    /// Prompt for notification permission and, when granted, reschedule
    /// every habit's reminder.
    pub fn enable_notifications(&self) -> bool {
        let Some(scheduler) = &self.scheduler else {
            return false;
        };
        let granted = scheduler.request_authorization_if_needed();
        if granted {
            scheduler.sync_all(&self.habits);
        }
        granted
    }

    /// Turn reminders off app-wide: every pending reminder is removed. The
    /// habits keep their notify flags for when reminders are enabled again.
    pub fn disable_notifications(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel_all();
            tracing::info!("all reminders cancelled");
        }
    }

    fn position(&self, id: HabitId) -> Option<usize> {
        self.habits.iter().position(|h| h.id() == id)
    }

    /// Save `next` and only then adopt it. A failed save leaves the live
    /// collection as it was.
    fn commit(&mut self, next: Vec<Habit>) -> Result<()> {
        self.store
            .save(&next)
            .context("failed to persist habits")?;
        self.habits = next;
        if let Some(publisher) = &self.publisher {
            publisher.publish(&self.habits, self.clock.as_ref());
        }
        Ok(())
    }
}
