use serde::{Deserialize, Serialize};

use crate::day::DayKey;
use crate::habit::Habit;

/// How far back the best-streak walk reaches.
pub const STREAK_LOOKBACK_DAYS: usize = 365;

/// Days shown by the per-habit progress grid.
pub const GRID_DAYS: usize = 14;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitStats {
    pub best_streak: usize,
    pub window_rate: f64,
    pub today_rate: f64,
    pub total_completions: usize,
    /// One entry per window day, oldest first.
    pub bars: Vec<f64>,
}

/// Derive collection-wide statistics over the `window` days ending `today`.
pub fn compute_stats(habits: &[Habit], window: usize, today: DayKey) -> HabitStats {
    let days = today.trailing(window);
    let denominator = habits.len().max(1);

    let per_day: Vec<usize> = days
        .iter()
        .map(|day| habits.iter().filter(|h| h.is_completed_on(*day)).count())
        .collect();

    let completed_in_window: usize = per_day.iter().sum();
    let window_rate = completed_in_window as f64 / (denominator * window.max(1)) as f64;

    let completed_today = habits.iter().filter(|h| h.is_completed_on(today)).count();
    let today_rate = completed_today as f64 / denominator as f64;

    let bars = per_day
        .iter()
        .map(|count| *count as f64 / denominator as f64)
        .collect();

    HabitStats {
        best_streak: best_streak(habits, today),
        window_rate,
        today_rate,
        total_completions: total_completions(habits),
        bars,
    }
}

/// Longest run of consecutive completed days for any habit, looking back a year.
pub fn best_streak(habits: &[Habit], today: DayKey) -> usize {
    habits
        .iter()
        .map(|habit| best_streak_in(habit, today, STREAK_LOOKBACK_DAYS))
        .max()
        .unwrap_or(0)
}

/// Longest consecutive run among the `lookback` days ending `today`.
pub fn best_streak_in(habit: &Habit, today: DayKey, lookback: usize) -> usize {
    let mut best = 0;
    let mut current = 0;
    for offset in 0..lookback {
        if habit.is_completed_on(today.days_before(offset as i64)) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// Consecutive completed days ending today. Zero when today is not done.
pub fn current_streak(habit: &Habit, today: DayKey) -> usize {
    let mut streak = 0;
    let mut day = today;
    while habit.is_completed_on(day) {
        streak += 1;
        let previous = day.days_before(1);
        if previous == day {
            break;
        }
        day = previous;
    }
    streak
}

pub fn total_completions(habits: &[Habit]) -> usize {
    habits.iter().map(|h| h.completed_days().len()).sum()
}

/// Fraction of `days` on which the habit was completed.
pub fn habit_rate(habit: &Habit, days: &[DayKey]) -> f64 {
    if days.is_empty() {
        return 0.0;
    }
    let done = days.iter().filter(|day| habit.is_completed_on(**day)).count();
    done as f64 / days.len() as f64
}

/// The progress grid: [`GRID_DAYS`] days ending `weeks_back` weeks before today.
pub fn days_window(today: DayKey, weeks_back: u32) -> Vec<DayKey> {
    today
        .days_before(i64::from(weeks_back) * 7)
        .trailing(GRID_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> DayKey {
        DayKey::from_ymd(y, m, d).unwrap()
    }

    #[test]
    fn empty_collection_yields_zeroes() {
        let stats = compute_stats(&[], 7, day(2024, 1, 10));
        assert_eq!(stats.best_streak, 0);
        assert_eq!(stats.total_completions, 0);
        assert_eq!(stats.today_rate, 0.0);
        assert_eq!(stats.window_rate, 0.0);
        assert_eq!(stats.bars, vec![0.0; 7]);
    }

    #[test]
    fn water_scenario() {
        let habits = vec![Habit::new("Water")
            .with_completed_days([day(2024, 1, 1), day(2024, 1, 2)])];
        let stats = compute_stats(&habits, 2, day(2024, 1, 2));
        assert_eq!(stats.today_rate, 1.0);
        assert_eq!(stats.window_rate, 1.0);
        assert_eq!(stats.best_streak, 2);
        assert_eq!(stats.total_completions, 2);
        assert_eq!(stats.bars, vec![1.0, 1.0]);
    }

    #[test]
    fn best_streak_counts_runs_that_ended_before_today() {
        let today = day(2024, 6, 30);
        let run = (10..=14).map(|d| day(2024, 6, d));
        let habit = Habit::new("Run").with_completed_days(run.chain([day(2024, 6, 29)]));
        assert_eq!(best_streak_in(&habit, today, STREAK_LOOKBACK_DAYS), 5);
        assert_eq!(current_streak(&habit, today), 0);
        assert_eq!(current_streak(&habit, day(2024, 6, 29)), 1);
    }

    #[test]
    fn best_streak_of_trailing_k_days_is_k() {
        let today = day(2024, 3, 3);
        for k in [1usize, 3, 40] {
            let habit = Habit::new("Floss").with_completed_days(today.trailing(k));
            assert_eq!(best_streak(&[habit.clone()], today), k);
            assert_eq!(current_streak(&habit, today), k);
        }
    }

    #[test]
    fn streak_walk_ignores_days_beyond_lookback() {
        let today = day(2024, 12, 31);
        let old = today.days_before(400).trailing(10);
        let habit = Habit::new("Journal").with_completed_days(old);
        assert_eq!(best_streak(&[habit], today), 0);
    }

    #[test]
    fn rates_stay_within_unit_interval() {
        let today = day(2024, 2, 10);
        let habits = vec![
            Habit::new("A").with_completed_days(today.trailing(3)),
            Habit::new("B").with_completed_days([today.days_before(1)]),
            Habit::new("C"),
        ];
        let stats = compute_stats(&habits, 4, today);
        assert!((0.0..=1.0).contains(&stats.today_rate));
        assert!((0.0..=1.0).contains(&stats.window_rate));
        assert!((stats.today_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.window_rate - 4.0 / 12.0).abs() < 1e-9);
        let expected = [0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0 / 3.0];
        for (bar, want) in stats.bars.iter().zip(expected) {
            assert!((bar - want).abs() < 1e-9);
        }
    }

    #[test]
    fn habit_rate_over_grid_window() {
        let today = day(2024, 4, 20);
        let grid = days_window(today, 1);
        assert_eq!(grid.len(), GRID_DAYS);
        assert_eq!(grid.last().copied(), Some(day(2024, 4, 13)));
        let habit = Habit::new("Tea").with_completed_days(grid.iter().copied().take(7));
        assert!((habit_rate(&habit, &grid) - 0.5).abs() < 1e-9);
        assert_eq!(habit_rate(&habit, &[]), 0.0);
    }
}
