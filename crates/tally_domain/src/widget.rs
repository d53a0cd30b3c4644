use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::day::Clock;
use crate::error::StoreError;
use crate::habit::Habit;
use crate::kv::KeyValueStore;
use crate::stats::compute_stats;

pub const SNAPSHOT_KEY: &str = "tally.widget.snapshot.v1";
pub const PENDING_PAIRS_KEY: &str = "tally.widget.pendingPairs.v1";
pub const LEGACY_PENDING_TITLES_KEY: &str = "tally.widget.pendingTitles.v1";
pub const LEGACY_PENDING_IDS_KEY: &str = "tally.widget.pendingIDs.v1";

pub const DEFAULT_WINDOW_DAYS: usize = 28;
pub const MAX_PENDING: usize = 2;

/// Summary the widget process renders without loading the habit collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSnapshot {
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    pub best_streak: usize,
    /// Today's completion fraction.
    pub completion_rate: f64,
    pub total_completions: usize,
    #[serde(default)]
    pub pending_titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPair {
    pub id: String,
    pub title: String,
}

/// Tells the widget host to redraw from the shared area.
pub trait WidgetRefresher: Send + Sync {
    fn reload_all(&self);
}

#[derive(Debug, Default)]
pub struct NoopRefresher;

impl WidgetRefresher for NoopRefresher {
    fn reload_all(&self) {}
}

/// Recomputes the widget summary after every persist.
#[derive(Clone)]
pub struct WidgetPublisher {
    shared: Option<Arc<dyn KeyValueStore>>,
    refresher: Arc<dyn WidgetRefresher>,
    window_days: usize,
}

impl WidgetPublisher {
    pub fn new(shared: Option<Arc<dyn KeyValueStore>>, refresher: Arc<dyn WidgetRefresher>) -> Self {
        Self {
            shared,
            refresher,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    pub fn with_window_days(mut self, days: usize) -> Self {
        self.window_days = days.max(1);
        self
    }

    pub fn window_days(&self) -> usize {
        self.window_days
    }

    /// Build the snapshot and pending list for `habits` without writing them.
    pub fn compose(&self, habits: &[Habit], clock: &dyn Clock) -> (WidgetSnapshot, Vec<PendingPair>) {
        let today = clock.today();
        let stats = compute_stats(habits, self.window_days, today);
        let pending = pending_pairs(habits, clock);
        let snapshot = WidgetSnapshot {
            date: clock.now(),
            best_streak: stats.best_streak,
            completion_rate: stats.today_rate,
            total_completions: stats.total_completions,
            pending_titles: pending.iter().map(|pair| pair.title.clone()).collect(),
        };
        (snapshot, pending)
    }

    /// Overwrite the snapshot and pending list, then signal the widget.
    /// Never fails: an unavailable or failing shared area skips the publish.
    #[tracing::instrument(skip_all, fields(habits = habits.len()))]
    pub fn publish(&self, habits: &[Habit], clock: &dyn Clock) {
        let Some(shared) = &self.shared else {
            tracing::debug!("no shared area, skipping widget publish");
            return;
        };
        let (snapshot, pending) = self.compose(habits, clock);

        // Two independent single-key writes; a reader in between sees a mix.
        if let Err(err) = write_json(shared.as_ref(), SNAPSHOT_KEY, &snapshot) {
            tracing::warn!(%err, "failed to write widget snapshot");
            return;
        }
        if let Err(err) = write_json(shared.as_ref(), PENDING_PAIRS_KEY, &pending) {
            tracing::warn!(%err, "failed to write pending habits");
            return;
        }
        for legacy in [LEGACY_PENDING_TITLES_KEY, LEGACY_PENDING_IDS_KEY] {
            if let Err(err) = shared.remove(legacy) {
                tracing::debug!(%err, key = legacy, "failed to clear legacy pending key");
            }
        }
        self.refresher.reload_all();
    }
}

/// Up to [`MAX_PENDING`] habits not done today, in collection order. Blank
/// titles are skipped.
pub fn pending_pairs(habits: &[Habit], clock: &dyn Clock) -> Vec<PendingPair> {
    let today = clock.today();
    habits
        .iter()
        .filter(|habit| !habit.is_completed_on(today))
        .filter_map(|habit| {
            habit.display_title().map(|title| PendingPair {
                id: habit.id().to_string(),
                title: title.to_string(),
            })
        })
        .take(MAX_PENDING)
        .collect()
}

/// Read side used by the widget process.
#[derive(Clone)]
pub struct WidgetReader {
    shared: Arc<dyn KeyValueStore>,
}

impl WidgetReader {
    pub fn new(shared: Arc<dyn KeyValueStore>) -> Self {
        Self { shared }
    }

    pub fn load_snapshot(&self) -> Option<WidgetSnapshot> {
        read_json(self.shared.as_ref(), SNAPSHOT_KEY)
    }

    /// The paired list when present, otherwise the legacy parallel arrays.
    pub fn load_pending(&self) -> Vec<PendingPair> {
        let pairs: Vec<PendingPair> = read_json::<Vec<PendingPair>>(self.shared.as_ref(), PENDING_PAIRS_KEY)
            .unwrap_or_default()
            .into_iter()
            .filter(|pair| !pair.id.is_empty() && !pair.title.is_empty())
            .collect();
        if !pairs.is_empty() {
            return pairs;
        }

        let titles: Vec<String> =
            read_json(self.shared.as_ref(), LEGACY_PENDING_TITLES_KEY).unwrap_or_default();
        let ids: Vec<String> =
            read_json(self.shared.as_ref(), LEGACY_PENDING_IDS_KEY).unwrap_or_default();
        ids.into_iter()
            .zip(titles)
            .map(|(id, title)| PendingPair { id, title })
            .take(MAX_PENDING)
            .collect()
    }
}

fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &bytes)
}

fn read_json<T: serde::de::DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let bytes = match store.get(key) {
        Ok(bytes) => bytes?,
        Err(err) => {
            tracing::warn!(%err, key, "failed to read widget key");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(%err, key, "undecodable widget payload");
            None
        }
    }
}
