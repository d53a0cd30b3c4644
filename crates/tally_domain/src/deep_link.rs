use std::sync::Arc;

use url::Url;

use crate::day::Clock;
use crate::error::StoreError;
use crate::habit::{Habit, HabitId};
use crate::signal::HabitsChanged;
use crate::store::HabitsStoring;
use crate::widget::WidgetPublisher;

pub const DEEP_LINK_SCHEME: &str = "tally";

/// A parsed activation URL such as `tally://check?id=<uuid>` or
/// `tally://check?habit=Drink%20Water`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    pub id: Option<HabitId>,
    pub title: Option<String>,
}

impl DeepLink {
    /// `None` unless the scheme is ours and the link names a habit.
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        if !url.scheme().eq_ignore_ascii_case(DEEP_LINK_SCHEME) {
            return None;
        }
        let mut id = None;
        let mut title = None;
        for (name, value) in url.query_pairs() {
            match &*name {
                "id" if id.is_none() => id = value.parse::<HabitId>().ok(),
                "habit" if title.is_none() => title = Some(value.into_owned()),
                _ => {}
            }
        }
        if id.is_none() && title.is_none() {
            return None;
        }
        Some(Self { id, title })
    }

    /// Link the widget attaches to a pending habit row.
    pub fn for_habit(id: HabitId) -> String {
        format!("{DEEP_LINK_SCHEME}://check?id={id}")
    }

    /// Position of the targeted habit. A usable id decides alone, even when
    /// it matches nothing; the exact title is consulted only without one.
    pub fn locate(&self, habits: &[Habit]) -> Option<usize> {
        if let Some(id) = self.id {
            return habits.iter().position(|h| h.id() == id);
        }
        let title = self.title.as_deref()?;
        habits.iter().position(|h| h.title == title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepLinkOutcome {
    /// Wrong scheme or no habit parameter.
    Ignored,
    NotFound,
    Toggled { id: HabitId, completed: bool },
}

/// Applies widget taps to the shared collection from outside the live app.
///
/// Two overlapping activations are not serialized; each performs its own
/// load-toggle-save, so an interleaving can toggle twice.
pub struct DeepLinkReconciler {
    store: Arc<dyn HabitsStoring>,
    publisher: WidgetPublisher,
    changed: Arc<HabitsChanged>,
    clock: Arc<dyn Clock>,
}

impl DeepLinkReconciler {
    pub fn new(
        store: Arc<dyn HabitsStoring>,
        publisher: WidgetPublisher,
        changed: Arc<HabitsChanged>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            changed,
            clock,
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn handle(&self, raw: &str) -> Result<DeepLinkOutcome, StoreError> {
        let Some(link) = DeepLink::parse(raw) else {
            tracing::debug!("ignoring foreign or empty activation");
            return Ok(DeepLinkOutcome::Ignored);
        };
        let mut habits = self.store.load();
        let Some(index) = link.locate(&habits) else {
            tracing::info!(?link, "activation matched no habit");
            return Ok(DeepLinkOutcome::NotFound);
        };

        let habit = &mut habits[index];
        let completed = habit.toggle_today(self.clock.as_ref());
        let id = habit.id();

        self.store.save(&habits)?;
        self.publisher.publish(&habits, self.clock.as_ref());
        self.changed.emit();
        tracing::info!(%id, completed, "habit toggled from activation");
        Ok(DeepLinkOutcome::Toggled { id, completed })
    }
}
