use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tally_domain::day::{Clock, SystemClock};
use tally_domain::deep_link::{DeepLinkOutcome, DeepLinkReconciler};
use tally_domain::habit::Habit;
use tally_domain::kv::{DirectoryStore, KeyValueStore, MemoryStore, SharedArea};
use tally_domain::notifications::{
    AuthorizationStatus, NotificationScheduler, StoredNotificationCenter,
};
use tally_domain::signal::HabitsChanged;
use tally_domain::stats;
use tally_domain::store::{HabitsStore, HABITS_KEY};
use tally_domain::widget::{WidgetPublisher, WidgetReader, WidgetRefresher, DEFAULT_WINDOW_DAYS};
use tally_domain::HabitService;
use tally_quotes::{GeminiQuoteSource, QuoteService, QuoteSource};
use tracing::{debug, info, warn};

use crate::cli::{Command, NotificationsAction};

/// How the simulated OS answers the first notification prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationPolicy {
    Undetermined,
    Granted,
    Denied,
}

impl NotificationPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "undetermined" | "ask" => Some(Self::Undetermined),
            "granted" | "authorized" | "yes" => Some(Self::Granted),
            "denied" | "no" => Some(Self::Denied),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) shared_dir: PathBuf,
    pub(crate) local_dir: PathBuf,
    pub(crate) window_days: usize,
    pub(crate) notifications: NotificationPolicy,
    pub(crate) gemini_api_key: Option<String>,
    pub(crate) quote_model: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_vars(std::env::vars()))
    }

    /// Defaults overridden by whichever `TALLY_*` / `GEMINI_*` variables are present.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut config = Self::default();
        for (name, value) in vars {
            match name.as_str() {
                "TALLY_SHARED_DIR" if !value.trim().is_empty() => {
                    config.shared_dir = PathBuf::from(value);
                }
                "TALLY_LOCAL_DIR" if !value.trim().is_empty() => {
                    config.local_dir = PathBuf::from(value);
                }
                "TALLY_STATS_WINDOW_DAYS" => match value.trim().parse::<usize>() {
                    Ok(days) if days > 0 => config.window_days = days,
                    _ => warn!(%value, "ignoring invalid TALLY_STATS_WINDOW_DAYS"),
                },
                "TALLY_NOTIFICATIONS" => match NotificationPolicy::parse(&value) {
                    Some(policy) => config.notifications = policy,
                    None => warn!(%value, "ignoring invalid TALLY_NOTIFICATIONS"),
                },
                "GEMINI_API_KEY" if !value.trim().is_empty() => {
                    config.gemini_api_key = Some(value);
                }
                "TALLY_QUOTE_MODEL" if !value.trim().is_empty() => {
                    config.quote_model = Some(value);
                }
                _ => {}
            }
        }
        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally");
        Self {
            shared_dir: base.join("shared"),
            local_dir: base.join("local"),
            window_days: DEFAULT_WINDOW_DAYS,
            notifications: NotificationPolicy::Undetermined,
            gemini_api_key: None,
            quote_model: None,
        }
    }
}

/// Asks the widget host to redraw. The CLI has no widget host, so this only logs.
struct LoggingRefresher;

impl WidgetRefresher for LoggingRefresher {
    fn reload_all(&self) {
        debug!("widget timelines reload requested");
    }
}

/// Everything a command needs, wired once per process.
pub struct App {
    config: AppConfig,
    area: SharedArea,
    local: Arc<dyn KeyValueStore>,
    store: Arc<HabitsStore>,
    scheduler: NotificationScheduler,
    publisher: WidgetPublisher,
    changed: Arc<HabitsChanged>,
    clock: Arc<dyn Clock>,
}

impl App {
    pub fn open(config: AppConfig) -> Self {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            shared = %config.shared_dir.display(),
            local = %config.local_dir.display(),
            "opening stores"
        );
        let local: Arc<dyn KeyValueStore> = match DirectoryStore::open(&config.local_dir) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                warn!(%err, "local store unavailable, state will not survive this run");
                Arc::new(MemoryStore::new())
            }
        };
        let area = SharedArea::open(&config.shared_dir);
        let store = Arc::new(HabitsStore::with_legacy(&area, local.as_ref()));

        let (status, grant) = match config.notifications {
            NotificationPolicy::Undetermined => (AuthorizationStatus::NotDetermined, true),
            NotificationPolicy::Granted => (AuthorizationStatus::Authorized, true),
            NotificationPolicy::Denied => (AuthorizationStatus::Denied, false),
        };
        let scheduler = NotificationScheduler::new(Arc::new(StoredNotificationCenter::new(
            Arc::clone(&local),
            status,
            grant,
        )));

        let shared = area.is_shared().then(|| area.store());
        let publisher = WidgetPublisher::new(shared, Arc::new(LoggingRefresher))
            .with_window_days(config.window_days);

        Self {
            config,
            area,
            local,
            store,
            scheduler,
            publisher,
            changed: Arc::new(HabitsChanged::new()),
            clock,
        }
    }

    pub fn service(&self) -> Result<HabitService> {
        HabitService::builder(self.store.clone())
            .with_scheduler(self.scheduler.clone())
            .with_publisher(self.publisher.clone())
            .with_clock(Arc::clone(&self.clock))
            .build()
            .context("failed to load habits")
    }

    pub fn reconciler(&self) -> DeepLinkReconciler {
        DeepLinkReconciler::new(
            self.store.clone(),
            self.publisher.clone(),
            Arc::clone(&self.changed),
            Arc::clone(&self.clock),
        )
    }

    pub fn widget_reader(&self) -> WidgetReader {
        WidgetReader::new(self.area.store())
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn quotes(&self) -> QuoteService {
        let source = self.config.gemini_api_key.as_deref().and_then(|key| {
            let source = GeminiQuoteSource::new(key).ok()?;
            Some(match &self.config.quote_model {
                Some(model) => source.with_model(model.clone()),
                None => source,
            })
        });
        if source.is_none() {
            info!("no quote API key configured, using local quotes");
        }
        QuoteService::new(
            source.map(|s| Arc::new(s) as Arc<dyn QuoteSource>),
            Arc::clone(&self.local),
            Arc::clone(&self.clock),
        )
    }
}

pub fn run(config: AppConfig, command: Command) -> Result<()> {
    let app = App::open(config);
    execute(&app, command, &mut std::io::stdout())
}

/// Run one command against `app`, writing human-readable output to `out`.
pub fn execute(app: &App, command: Command, out: &mut impl std::io::Write) -> Result<()> {
    match command {
        Command::List => {
            let service = app.service()?;
            write_list(out, service.habits(), app.clock.as_ref())?;
        }
        Command::Add {
            title,
            at,
            notify,
            notes,
        } => {
            let mut service = app.service()?;
            let id = service.add(&title, at, notify, &notes)?;
            writeln!(out, "added {id}")?;
        }
        Command::Toggle { id } => {
            let mut service = app.service()?;
            match service.toggle(id)? {
                Some(true) => writeln!(out, "{id} done today")?,
                Some(false) => writeln!(out, "{id} not done today")?,
                None => bail!("no habit with id {id}"),
            }
        }
        Command::Edit {
            id,
            title,
            at,
            no_time,
            notify,
            notes,
        } => {
            let mut service = app.service()?;
            let Some(mut habit) = service.habit(id).cloned() else {
                bail!("no habit with id {id}");
            };
            if let Some(title) = title {
                habit.title = title;
            }
            if no_time {
                habit.time = None;
            } else if at.is_some() {
                habit.time = at;
            }
            if let Some(notify) = notify {
                habit.notify = notify;
            }
            if let Some(notes) = notes {
                habit.notes = notes;
            }
            service.update(habit)?;
            writeln!(out, "updated {id}")?;
        }
        Command::Delete { ids } => {
            let mut service = app.service()?;
            let removed = service.delete_many(&ids)?;
            writeln!(out, "deleted {} habit(s)", removed.len())?;
        }
        Command::Stats { days } => {
            let service = app.service()?;
            let days = days.unwrap_or(app.config.window_days).max(1);
            let stats = service.stats(days);
            writeln!(out, "best streak:   {} day(s)", stats.best_streak)?;
            writeln!(out, "today:         {:.0}%", stats.today_rate * 100.0)?;
            writeln!(out, "last {days} days:  {:.0}%", stats.window_rate * 100.0)?;
            writeln!(out, "completions:   {}", stats.total_completions)?;
            writeln!(out, "bars:          {}", sparkline(&stats.bars))?;
        }
        Command::Open { url } => match app.reconciler().handle(&url)? {
            DeepLinkOutcome::Toggled { id, completed } => {
                writeln!(out, "{id} {}", if completed { "done today" } else { "not done today" })?;
            }
            DeepLinkOutcome::NotFound => writeln!(out, "no matching habit")?,
            DeepLinkOutcome::Ignored => writeln!(out, "ignored")?,
        },
        Command::Widget => {
            let reader = app.widget_reader();
            match reader.load_snapshot() {
                Some(snapshot) => {
                    writeln!(out, "as of:        {}", snapshot.date.with_timezone(&Local))?;
                    writeln!(out, "best streak:  {}", snapshot.best_streak)?;
                    writeln!(out, "today:        {:.0}%", snapshot.completion_rate * 100.0)?;
                    writeln!(out, "completions:  {}", snapshot.total_completions)?;
                }
                None => writeln!(out, "no snapshot published")?,
            }
            for pair in reader.load_pending() {
                writeln!(out, "pending: {}  {}", pair.title, pair.id)?;
            }
        }
        Command::Reminders => {
            let now = Local::now();
            for request in app.scheduler().center().pending() {
                let next = request
                    .next_fire_after(now)
                    .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(out, "{}  {}  next {}  ({})", request.at, request.body, next, request.identifier)?;
            }
        }
        Command::Notifications { action } => match action {
            NotificationsAction::Enable => {
                let service = app.service()?;
                if service.enable_notifications() {
                    writeln!(out, "notifications enabled")?;
                } else {
                    writeln!(out, "notifications denied")?;
                }
            }
            NotificationsAction::Disable => {
                app.service()?.disable_notifications();
                writeln!(out, "notifications disabled")?;
            }
            NotificationsAction::Status => {
                writeln!(out, "{:?}", app.scheduler().center().authorization_status())?;
            }
        },
        Command::Quote { force } => {
            let service = app.service()?;
            let quotes = app.quotes();
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            let state = runtime.block_on(quotes.refresh(service.habits(), force));
            match (state.quote, state.error) {
                (Some(quote), _) => writeln!(out, "\"{}\" - {}", quote.text, quote.author)?,
                (None, Some(error)) => writeln!(out, "no quote: {error}")?,
                (None, None) => writeln!(out, "no quote yet")?,
            }
        }
        Command::Watch => watch(app, out)?,
    }
    Ok(())
}

fn watch(app: &App, out: &mut impl std::io::Write) -> Result<()> {
    let Some(directory) = app.area.directory() else {
        bail!("shared area unavailable, nothing to watch");
    };
    let mut service = app.service()?;
    write_list(out, service.habits(), app.clock.as_ref())?;

    let (tx, rx) = mpsc::channel::<()>();
    let _subscription = app.changed.subscribe(move || {
        let _ = tx.send(());
    });
    let changed = Arc::clone(&app.changed);
    let _watcher = directory.watch(move |key| {
        if key == HABITS_KEY {
            changed.emit();
        }
    })?;
    info!("watching shared area for habit changes");

    while rx.recv().is_ok() {
        service.reload();
        writeln!(out, "-- habits changed --")?;
        write_list(out, service.habits(), app.clock.as_ref())?;
        out.flush()?;
    }
    Ok(())
}

fn write_list(out: &mut impl std::io::Write, habits: &[Habit], clock: &dyn Clock) -> Result<()> {
    if habits.is_empty() {
        writeln!(out, "no habits yet")?;
        return Ok(());
    }
    let today = clock.today();
    for habit in habits {
        let mark = if habit.is_completed_on(today) { "x" } else { " " };
        let time = habit
            .time
            .filter(|_| habit.notify)
            .map(|t| format!(" @{t}"))
            .unwrap_or_default();
        writeln!(
            out,
            "[{mark}] {}  {}{}  streak {}",
            habit.id(),
            habit.display_title().unwrap_or("(untitled)"),
            time,
            stats::current_streak(habit, today)
        )?;
    }
    Ok(())
}

fn sparkline(bars: &[f64]) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    bars.iter()
        .map(|value| {
            let idx = (value.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f64).round() as usize;
            LEVELS[idx]
        })
        .collect()
}
