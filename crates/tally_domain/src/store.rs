use std::sync::Arc;

use crate::error::StoreError;
use crate::habit::Habit;
use crate::kv::{KeyValueStore, SharedArea};

/// Key of the habit collection inside the shared namespace.
pub const HABITS_KEY: &str = "tally.habits.v2";
/// Key the single-process build used in its local store.
pub const LEGACY_HABITS_KEY: &str = "tally.habits.v1";

/// Abstract persistence seam for the habit collection.
pub trait HabitsStoring: Send + Sync {
    /// The persisted collection. Missing or undecodable data reads as empty.
    fn load(&self) -> Vec<Habit>;
    /// Replace the whole persisted collection.
    fn save(&self, habits: &[Habit]) -> Result<(), StoreError>;
}

/// JSON-encoded habit collection stored under one key of the shared area.
#[derive(Clone)]
pub struct HabitsStore {
    shared: Arc<dyn KeyValueStore>,
}

impl HabitsStore {
    pub fn new(area: &SharedArea) -> Self {
        Self {
            shared: area.store(),
        }
    }

    /// Open the store and copy any legacy payload into the shared area.
    pub fn with_legacy(area: &SharedArea, legacy: &dyn KeyValueStore) -> Self {
        let store = Self::new(area);
        if area.is_shared() {
            store.migrate_from(legacy);
        }
        store
    }

    /// Copy the legacy collection into the shared key when the shared key is
    /// still empty. The legacy copy is left in place; once the shared key is
    /// populated this does nothing. Returns true when data was copied.
    pub fn migrate_from(&self, legacy: &dyn KeyValueStore) -> bool {
        match self.shared.get(HABITS_KEY) {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%err, "unable to inspect shared habits key, skipping migration");
                return false;
            }
        }
        let payload = match legacy.get(LEGACY_HABITS_KEY) {
            Ok(Some(payload)) => payload,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!(%err, "unable to read legacy habits");
                return false;
            }
        };
        match self.shared.set(HABITS_KEY, &payload) {
            Ok(()) => {
                tracing::info!(bytes = payload.len(), "migrated legacy habits into shared area");
                true
            }
            Err(err) => {
                tracing::warn!(%err, "legacy habit migration failed");
                false
            }
        }
    }
}

impl HabitsStoring for HabitsStore {
    fn load(&self) -> Vec<Habit> {
        let payload = match self.shared.get(HABITS_KEY) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(%err, "failed to read habits, treating as empty");
                return Vec::new();
            }
        };
        serde_json::from_slice(&payload).unwrap_or_else(|err| {
            tracing::warn!(%err, "failed to decode habits, treating as empty");
            Vec::new()
        })
    }

    fn save(&self, habits: &[Habit]) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(habits).map_err(|source| StoreError::Encode {
            key: HABITS_KEY.to_string(),
            source,
        })?;
        self.shared.set(HABITS_KEY, &payload)?;
        tracing::debug!(count = habits.len(), "habits saved");
        Ok(())
    }
}
