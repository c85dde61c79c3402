//! Distribution engine: partition items across the days of a date range.
//!
//! Two modes:
//!
//! ```text
//! round-robin  no item carries a date; item i -> day (i mod total_days)
//! dated        at least one item carries a date; dated items go to their
//!              day (clamped into the window), undated items round-robin
//! ```
//!
//! [`distribute`] is pure: same input, same output, input untouched.

use std::ops::AddAssign;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::Item;

/// Longest plan span accepted, in days.
pub const MAX_TOTAL_DAYS: u32 = 366;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("invalid date range: end {end} is before start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("date range spans {days} days, more than the maximum of {max}")]
    RangeTooLong { days: i64, max: u32 },
}

/// Elementwise sums of the numeric item fields. Absent and non-numeric
/// values contribute 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub sets: f64,
    pub reps: f64,
    pub weight: f64,
    pub minutes: f64,
    pub grams: f64,
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
}

impl Totals {
    pub fn of(item: &Item) -> Self {
        Self {
            sets: item.sets.unwrap_or(0.0),
            reps: item.reps.as_ref().map_or(0.0, |r| r.value()),
            weight: item.weight.as_ref().map_or(0.0, |w| w.value()),
            minutes: item.minutes.unwrap_or(0.0),
            grams: item.grams.unwrap_or(0.0),
            calories: item.calories.unwrap_or(0.0),
            protein: item.protein.unwrap_or(0.0),
            fat: item.fat.unwrap_or(0.0),
            carbs: item.carbs.unwrap_or(0.0),
        }
    }

    pub fn sum<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        let mut totals = Self::default();
        for item in items {
            totals += Self::of(item);
        }
        totals
    }
}

impl AddAssign for Totals {
    fn add_assign(&mut self, rhs: Self) {
        self.sets += rhs.sets;
        self.reps += rhs.reps;
        self.weight += rhs.weight;
        self.minutes += rhs.minutes;
        self.grams += rhs.grams;
        self.calories += rhs.calories;
        self.protein += rhs.protein;
        self.fat += rhs.fat;
        self.carbs += rhs.carbs;
    }
}

/// Items scheduled for one calendar day of the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayBucket {
    /// 1-based position in the plan.
    pub day_number: u32,
    pub date: NaiveDate,
    pub items: Vec<Item>,
    pub totals: Totals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    RoundRobin,
    Dated,
}

/// The computed day-by-day schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedPlan {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: u32,
    pub mode: DistributionMode,
    pub days: Vec<DayBucket>,
    pub totals: Totals,
    pub total_items: usize,
    pub total_minutes: f64,
    pub total_calories: f64,
    /// Dated items whose date fell outside the window.
    #[serde(default)]
    pub clamped_items: usize,
}

impl DistributedPlan {
    /// Bucket for a 1-based day number.
    pub fn day(&self, day_number: u32) -> Option<&DayBucket> {
        let index = day_number.checked_sub(1)?;
        self.days.get(index as usize)
    }

    /// Every scheduled item with its day number, in schedule order.
    pub fn scheduled_items(&self) -> impl Iterator<Item = (&DayBucket, &Item)> {
        self.days
            .iter()
            .flat_map(|day| day.items.iter().map(move |item| (day, item)))
    }
}

/// Number of days in the inclusive span `[start, end]`.
pub fn span_days(start: NaiveDate, end: NaiveDate) -> Result<u32, DistributionError> {
    if end < start {
        return Err(DistributionError::InvalidRange { start, end });
    }
    let days = (end - start).num_days() + 1;
    if days > i64::from(MAX_TOTAL_DAYS) {
        return Err(DistributionError::RangeTooLong {
            days,
            max: MAX_TOTAL_DAYS,
        });
    }
    Ok(days as u32)
}

/// Partition `items` across the days of `[start, end]`.
pub fn distribute(
    items: &[Item],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<DistributedPlan, DistributionError> {
    let total_days = span_days(start, end)?;

    let mut days: Vec<DayBucket> = (0..total_days)
        .map(|offset| DayBucket {
            day_number: offset + 1,
            date: start + Days::new(u64::from(offset)),
            items: Vec::new(),
            totals: Totals::default(),
        })
        .collect();

    let mode = if items.iter().any(|item| item.date.is_some()) {
        DistributionMode::Dated
    } else {
        DistributionMode::RoundRobin
    };

    let mut clamped_items = 0;
    let mut undated = 0usize;
    for item in items {
        let index = match item.date {
            Some(date) => {
                let clamped = date.clamp(start, end);
                if clamped != date {
                    clamped_items += 1;
                }
                (clamped - start).num_days() as usize
            }
            None => {
                let index = undated % total_days as usize;
                undated += 1;
                index
            }
        };
        let bucket = &mut days[index];
        bucket.totals += Totals::of(item);
        bucket.items.push(item.clone());
    }

    let totals = Totals::sum(items);
    Ok(DistributedPlan {
        start_date: start,
        end_date: end,
        total_days,
        mode,
        days,
        total_items: items.len(),
        total_minutes: totals.minutes,
        total_calories: totals.calories,
        totals,
        clamped_items,
    })
}
