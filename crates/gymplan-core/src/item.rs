//! Canonical plan items and the normalization boundary.
//!
//! Items reach the system from trainers, mobile users and an AI generator,
//! each with its own field names (`name` vs `workout_name`, `weight` vs
//! `weight_kg`, ...). [`normalize_items`] is the only place those variants
//! are resolved; everything downstream works on [`Item`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use gymplan_db::models::PlanKind;

const NAME_KEYS: &[&str] = &["name", "workout_name", "exercise_name", "meal_name", "food_name"];
const CATEGORY_KEYS: &[&str] = &["categories", "category", "muscle_group", "tags"];
const DATE_KEYS: &[&str] = &["date", "scheduled_date", "day_date"];
const NOTES_KEYS: &[&str] = &["notes", "note", "instructions"];
const WEIGHT_KEYS: &[&str] = &["weight", "weight_kg"];
const MINUTES_KEYS: &[&str] = &["minutes", "duration", "duration_minutes"];
const GRAMS_KEYS: &[&str] = &["grams", "quantity_grams"];
const PROTEIN_KEYS: &[&str] = &["protein", "protein_g"];
const FAT_KEYS: &[&str] = &["fat", "fat_g"];
const CARBS_KEYS: &[&str] = &["carbs", "carbs_g", "carbohydrates"];

/// Errors raised while normalizing raw items.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemError {
    #[error("item {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("item {index} is missing required field {field:?}")]
    MissingField { index: usize, field: &'static str },

    #[error("item {index} has invalid meal_type {value:?} (expected Breakfast, Lunch, or Dinner)")]
    InvalidMealType { index: usize, value: String },

    #[error("item {index} has invalid date {value:?} (expected YYYY-MM-DD)")]
    InvalidDate { index: usize, value: String },

    #[error("item list must be a JSON array")]
    NotAList,
}

/// Meal slot of a meal item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Breakfast => "Breakfast",
            Self::Lunch => "Lunch",
            Self::Dinner => "Dinner",
        };
        f.write_str(s)
    }
}

impl FromStr for MealType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Ok(Self::Breakfast),
            "lunch" => Ok(Self::Lunch),
            "dinner" => Ok(Self::Dinner),
            _ => Err(()),
        }
    }
}

/// A quantity that is either a clean number or an opaque display string
/// such as a range (`"20-40"`) or `"8-12"` reps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    /// Numeric contribution to totals; text counts as 0.
    pub fn value(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(_) => 0.0,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(Self::Number),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else if let Some(n) = parse_number(s) {
                    Some(Self::Number(n))
                } else {
                    Some(Self::Text(s.to_owned()))
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One schedulable exercise or meal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub kind: PlanKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<MealType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
}

impl Item {
    /// A bare workout item, mostly for tests and previews.
    pub fn workout(name: impl Into<String>) -> Self {
        Self::bare(name, PlanKind::Workout)
    }

    /// A bare meal item.
    pub fn meal(name: impl Into<String>, meal_type: MealType, quantity: impl Into<String>) -> Self {
        let mut item = Self::bare(name, PlanKind::Meal);
        item.meal_type = Some(meal_type);
        item.quantity = Some(quantity.into());
        item
    }

    fn bare(name: impl Into<String>, kind: PlanKind) -> Self {
        Self {
            name: name.into(),
            kind,
            categories: Vec::new(),
            date: None,
            notes: None,
            sets: None,
            reps: None,
            weight: None,
            minutes: None,
            meal_type: None,
            quantity: None,
            grams: None,
            calories: None,
            protein: None,
            fat: None,
            carbs: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_minutes(mut self, minutes: f64) -> Self {
        self.minutes = Some(minutes);
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_calories(mut self, calories: f64) -> Self {
        self.calories = Some(calories);
        self
    }
}

/// Normalize a JSON item list (`[...]`, `{"items": [...]}` or `null`).
pub fn normalize_item_list(kind: PlanKind, value: &Value) -> Result<Vec<Item>, ItemError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => normalize_items(kind, items),
        Value::Object(map) => match map.get("items").or_else(|| map.get("exercises")) {
            Some(Value::Array(items)) => normalize_items(kind, items),
            _ => Err(ItemError::NotAList),
        },
        _ => Err(ItemError::NotAList),
    }
}

/// Normalize raw items into canonical [`Item`]s, validating required
/// fields for the plan kind.
pub fn normalize_items(kind: PlanKind, raw: &[Value]) -> Result<Vec<Item>, ItemError> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| normalize_item(kind, index, value))
        .collect()
}

fn normalize_item(kind: PlanKind, index: usize, value: &Value) -> Result<Item, ItemError> {
    let obj = value.as_object().ok_or(ItemError::NotAnObject { index })?;

    let name = first_string(obj, NAME_KEYS).ok_or(ItemError::MissingField {
        index,
        field: "name",
    })?;

    let mut item = Item::bare(name, kind);
    item.categories = categories(obj);
    item.notes = first_string(obj, NOTES_KEYS);
    item.date = match first(obj, DATE_KEYS) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(parse_day(raw).ok_or_else(|| ItemError::InvalidDate {
            index,
            value: display_raw(raw),
        })?),
    };

    match kind {
        PlanKind::Workout => {
            item.sets = first(obj, &["sets"]).and_then(number);
            item.reps = first(obj, &["reps"]).and_then(Amount::from_json);
            item.weight = first(obj, WEIGHT_KEYS).and_then(Amount::from_json);
            item.minutes = first(obj, MINUTES_KEYS).and_then(number);
        }
        PlanKind::Meal => {
            let meal_type = first(obj, &["meal_type"]).ok_or(ItemError::MissingField {
                index,
                field: "meal_type",
            })?;
            item.meal_type = Some(
                meal_type
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| ItemError::InvalidMealType {
                        index,
                        value: display_raw(meal_type),
                    })?,
            );

            let quantity = first(obj, &["quantity", "amount", "portion"])
                .and_then(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .ok_or(ItemError::MissingField {
                    index,
                    field: "quantity",
                })?;

            item.grams = first(obj, GRAMS_KEYS)
                .and_then(number)
                .or_else(|| grams_from_quantity(&quantity));
            item.quantity = Some(quantity);
            item.calories = first(obj, &["calories", "kcal"]).and_then(number);
            item.protein = first(obj, PROTEIN_KEYS).and_then(number);
            item.fat = first(obj, FAT_KEYS).and_then(number);
            item.carbs = first(obj, CARBS_KEYS).and_then(number);
        }
    }

    Ok(item)
}

/// First present, non-null value among `keys`.
fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

fn categories(obj: &Map<String, Value>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        let s = s.trim();
        if !s.is_empty() && !out.iter().any(|c| c.eq_ignore_ascii_case(s)) {
            out.push(s.to_owned());
        }
    };
    for key in CATEGORY_KEYS {
        match obj.get(*key) {
            Some(Value::String(s)) => s.split(',').for_each(&mut push),
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .for_each(&mut push),
            _ => {}
        }
    }
    out
}

/// Numeric value of a JSON number or a cleanly numeric string.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_number(s.trim()),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse a calendar day, ignoring any time-of-day suffix.
fn parse_day(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    let day = s.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// `"150"`, `"150g"` and `"150 grams"` all mean 150 grams.
fn grams_from_quantity(quantity: &str) -> Option<f64> {
    let q = quantity.trim().to_ascii_lowercase();
    let split = q
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(q.len());
    let (num, unit) = q.split_at(split);
    match unit.trim() {
        "" | "g" | "gr" | "gram" | "grams" => parse_number(num),
        _ => None,
    }
}

fn display_raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
