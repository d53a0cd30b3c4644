use clap::{Parser, Subcommand};
use tally_domain::habit::{HabitId, ReminderTime};

/// Track daily habits, streaks and reminders.
#[derive(Debug, Parser)]
#[command(name = "tally", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List habits with today's status and current streak.
    List,
    /// Add a habit.
    Add {
        title: String,
        /// Daily reminder time, HH:MM.
        #[arg(long)]
        at: Option<ReminderTime>,
        /// Enable the daily reminder.
        #[arg(long)]
        notify: bool,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Flip today's completion for a habit.
    Toggle { id: HabitId },
    /// Change a habit's fields.
    Edit {
        id: HabitId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "no_time")]
        at: Option<ReminderTime>,
        /// Clear the reminder time.
        #[arg(long)]
        no_time: bool,
        #[arg(long)]
        notify: Option<bool>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete one or more habits.
    Delete {
        #[arg(required = true)]
        ids: Vec<HabitId>,
    },
    /// Completion statistics over the last N days.
    Stats {
        /// Defaults to `TALLY_STATS_WINDOW_DAYS`.
        #[arg(long)]
        days: Option<usize>,
    },
    /// Handle an activation URL such as `tally://check?id=<uuid>`.
    Open { url: String },
    /// Print what the widget reads from the shared area.
    Widget,
    /// List scheduled reminders.
    Reminders,
    /// Notification permission.
    Notifications {
        #[command(subcommand)]
        action: NotificationsAction,
    },
    /// Quote of the day for the habits still open.
    Quote {
        #[arg(long)]
        force: bool,
    },
    /// Reprint the list whenever another process changes the habits.
    Watch,
}

#[derive(Debug, Subcommand)]
pub enum NotificationsAction {
    /// Request permission and reschedule every reminder.
    Enable,
    /// Cancel every scheduled reminder.
    Disable,
    /// Show the current permission state.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_reminder() {
        let cli = Cli::try_parse_from(["tally", "add", "Water", "--at", "07:30", "--notify"]).unwrap();
        match cli.command {
            Command::Add { title, at, notify, notes } => {
                assert_eq!(title, "Water");
                assert_eq!(at.map(|t| t.to_string()).as_deref(), Some("07:30"));
                assert!(notify);
                assert!(notes.is_empty());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_ids_and_times() {
        assert!(Cli::try_parse_from(["tally", "toggle", "nope"]).is_err());
        assert!(Cli::try_parse_from(["tally", "add", "Water", "--at", "25:00"]).is_err());
        assert!(Cli::try_parse_from(["tally", "delete"]).is_err());
    }
}
