//! Pure stats computation over a user's materialized day rows.
//!
//! Stats are always derived from the full set of rows, never incremented,
//! so recomputation is idempotent and safe under concurrent writers.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::distribution::Totals;
use crate::item::Item;

/// Default number of recent item names kept in the stats record.
pub const DEFAULT_RECENT_ITEMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsOptions {
    pub recent_items: usize,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            recent_items: DEFAULT_RECENT_ITEMS,
        }
    }
}

/// One day row as seen by the stats computation.
#[derive(Debug, Clone)]
pub struct DayRecord {
    pub source_plan_id: i64,
    pub day_number: i32,
    pub date: Option<NaiveDate>,
    pub items: Vec<Item>,
    pub totals: Totals,
    pub completed: bool,
    pub added_at: DateTime<Utc>,
}

/// Completion over a trailing window ending today.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub scheduled_days: usize,
    pub completed_days: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStats {
    pub total_days: usize,
    pub total_items: usize,
    /// Days with at least one item.
    pub total_workouts: usize,
    pub total_minutes: f64,
    pub total_calories: f64,
    pub totals: Totals,
    pub completed_days: usize,
    pub completed_items: usize,
    pub longest_streak: usize,
    pub weekday_tags: BTreeMap<String, Vec<String>>,
    pub recent_items: Vec<String>,
    pub weekly_progress: Progress,
    pub monthly_progress: Progress,
    pub computed_at: DateTime<Utc>,
}

pub fn compute_stats(
    records: &[DayRecord],
    today: NaiveDate,
    now: DateTime<Utc>,
    options: &StatsOptions,
) -> PlanStats {
    let mut totals = Totals::default();
    let mut total_items = 0;
    let mut total_workouts = 0;
    let mut completed_days = 0;
    let mut completed_items = 0;

    for record in records {
        totals += record.totals;
        total_items += record.items.len();
        if !record.items.is_empty() {
            total_workouts += 1;
        }
        if record.completed {
            completed_days += 1;
            completed_items += record.items.len();
        }
    }

    PlanStats {
        total_days: records.len(),
        total_items,
        total_workouts,
        total_minutes: totals.minutes,
        total_calories: totals.calories,
        totals,
        completed_days,
        completed_items,
        longest_streak: longest_streak(records),
        weekday_tags: weekday_tags(records),
        recent_items: recent_items(records, options.recent_items),
        weekly_progress: progress(records, today, 7),
        monthly_progress: progress(records, today, 30),
        computed_at: now,
    }
}

/// Longest run of consecutive completed days with at least one item.
/// Dated rows are keyed by calendar date, undated rows by day number.
fn longest_streak(records: &[DayRecord]) -> usize {
    let done = records
        .iter()
        .filter(|r| r.completed && !r.items.is_empty());

    let mut dated = BTreeSet::new();
    let mut undated = BTreeSet::new();
    for record in done {
        match record.date {
            Some(date) => dated.insert(i64::from(date.num_days_from_ce())),
            None => undated.insert(i64::from(record.day_number)),
        };
    }
    longest_run(&dated).max(longest_run(&undated))
}

fn longest_run(keys: &BTreeSet<i64>) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<i64> = None;
    for &key in keys {
        run = match prev {
            Some(p) if key == p + 1 => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(key);
    }
    best
}

/// Categories scheduled on each weekday, keyed by English weekday name.
fn weekday_tags(records: &[DayRecord]) -> BTreeMap<String, Vec<String>> {
    let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records {
        let Some(date) = record.date else { continue };
        let entry = tags.entry(weekday_name(date.weekday()).to_owned()).or_default();
        for category in record.items.iter().flat_map(|i| i.categories.iter()) {
            if !entry.iter().any(|c| c.eq_ignore_ascii_case(category)) {
                entry.push(category.clone());
            }
        }
    }
    tags
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Most recently added item names, newest first, deduplicated.
fn recent_items(records: &[DayRecord], limit: usize) -> Vec<String> {
    let mut ordered: Vec<&DayRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        b.added_at
            .cmp(&a.added_at)
            .then(b.source_plan_id.cmp(&a.source_plan_id))
            .then(b.day_number.cmp(&a.day_number))
    });

    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for item in ordered.iter().flat_map(|r| r.items.iter().rev()) {
        if names.len() >= limit {
            break;
        }
        if seen.insert(item.name.to_lowercase()) {
            names.push(item.name.clone());
        }
    }
    names
}

fn progress(records: &[DayRecord], today: NaiveDate, window: u64) -> Progress {
    let window_start = today
        .checked_sub_days(Days::new(window - 1))
        .unwrap_or(NaiveDate::MIN);

    let in_window = records
        .iter()
        .filter(|r| r.date.is_some_and(|d| d >= window_start && d <= today));

    let (mut scheduled_days, mut completed_days) = (0, 0);
    for record in in_window {
        scheduled_days += 1;
        if record.completed {
            completed_days += 1;
        }
    }

    let percent = if scheduled_days == 0 {
        0.0
    } else {
        (completed_days as f64 * 100.0 / scheduled_days as f64 * 10.0).round() / 10.0
    };

    Progress {
        window_start,
        window_end: today,
        scheduled_days,
        completed_days,
        percent,
    }
}
