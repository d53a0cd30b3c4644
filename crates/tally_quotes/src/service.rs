use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tally_domain::day::{Clock, DayKey};
use tally_domain::habit::Habit;
use tally_domain::kv::KeyValueStore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fallback::local_quote;
use crate::{Quote, QuoteSource};

pub const QUOTE_CACHE_KEY: &str = "tally.quote.cache.v2";
pub const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteCache {
    date_key: DayKey,
    habits_key: String,
    text: String,
    author: String,
}

/// What a front end shows for the quote card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteState {
    pub quote: Option<Quote>,
    pub error: Option<String>,
    pub loading: bool,
}

/// Throttled, cached, coalesced quote fetching.
pub struct QuoteService {
    source: Option<Arc<dyn QuoteSource>>,
    cache: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    state: Mutex<QuoteState>,
    last_fetch_at: Mutex<Option<Instant>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl QuoteService {
    /// With no `source` every fetch is served from the bundled pool.
    pub fn new(
        source: Option<Arc<dyn QuoteSource>>,
        cache: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service = Self {
            source,
            cache,
            clock,
            min_interval: MIN_FETCH_INTERVAL,
            state: Mutex::new(QuoteState::default()),
            last_fetch_at: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
        };
        if let Some(cached) = service.load_cache() {
            service.state.lock().quote = Some(Quote::new(cached.text, cached.author));
        }
        service
    }

    pub fn state(&self) -> QuoteState {
        self.state.lock().clone()
    }

    /// Refresh the quote for the habits not yet done today.
    ///
    /// Returns immediately with the current state when another refresh is
    /// running, when today's cache already matches the open habits, or when
    /// the last remote call was too recent. `force` skips the cache and
    /// throttle checks but still coalesces.
    pub async fn refresh(&self, habits: &[Habit], force: bool) -> QuoteState {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("quote refresh already in flight");
            return self.state();
        };

        let today = self.clock.today();
        let unchecked: Vec<&Habit> = habits.iter().filter(|h| !h.is_completed_on(today)).collect();
        let habits_key = habits_key(&unchecked);

        if !force {
            if let Some(cached) = self.load_cache() {
                if cached.date_key == today && cached.habits_key == habits_key {
                    let mut state = self.state.lock();
                    state.quote = Some(Quote::new(cached.text, cached.author));
                    state.error = None;
                    return state.clone();
                }
            }
            let recent = self
                .last_fetch_at
                .lock()
                .is_some_and(|last| last.elapsed() < self.min_interval);
            if recent {
                debug!("quote refresh throttled");
                return self.state();
            }
        }

        {
            let mut state = self.state.lock();
            state.loading = true;
            state.error = None;
        }

        let titles: Vec<String> = unchecked
            .iter()
            .filter_map(|h| h.display_title().map(str::to_string))
            .collect();
        let result = match &self.source {
            Some(source) => source.fetch(&titles).await,
            None => Ok(local_quote()),
        };
        *self.last_fetch_at.lock() = Some(Instant::now());

        let mut state = self.state.lock();
        state.loading = false;
        match result {
            Ok(quote) => {
                info!(author = %quote.author, "quote refreshed");
                self.save_cache(&QuoteCache {
                    date_key: today,
                    habits_key,
                    text: quote.text.clone(),
                    author: quote.author.clone(),
                });
                state.quote = Some(quote);
            }
            Err(err) => {
                warn!(%err, "quote refresh failed");
                state.error = Some(err.to_string());
            }
        }
        state.clone()
    }

    fn load_cache(&self) -> Option<QuoteCache> {
        let bytes = self.cache.get(QUOTE_CACHE_KEY).ok()??;
        serde_json::from_slice(&bytes).ok()
    }

    fn save_cache(&self, cache: &QuoteCache) {
        let result = serde_json::to_vec(cache)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Ok(self.cache.set(QUOTE_CACHE_KEY, &bytes)?));
        if let Err(err) = result {
            warn!(%err, "failed to cache quote");
        }
    }
}

/// Order-independent key over the open habits' normalised titles.
fn habits_key(habits: &[&Habit]) -> String {
    let mut titles: Vec<String> = habits
        .iter()
        .map(|h| h.title.trim().to_lowercase())
        .collect();
    titles.sort();
    titles.join("|")
}
