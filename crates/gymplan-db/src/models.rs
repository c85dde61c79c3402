use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Error returned when a stored or user-supplied string does not name a
/// known enum variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Superseded,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 4] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::Superseded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "superseded" => Ok(Self::Superseded),
            _ => Err(ParseEnumError::new("approval status", s)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Where a plan request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Manual,
    Ai,
    WebAssigned,
}

impl PlanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ai => "ai",
            Self::WebAssigned => "web_assigned",
        }
    }

    /// The materialized plan type that rows from this source are filed under.
    pub fn plan_type(&self) -> PlanType {
        match self {
            Self::Manual => PlanType::Manual,
            Self::Ai => PlanType::AiGenerated,
            Self::WebAssigned => PlanType::TrainerAssigned,
        }
    }
}

impl fmt::Display for PlanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "ai" => Ok(Self::Ai),
            "web_assigned" => Ok(Self::WebAssigned),
            _ => Err(ParseEnumError::new("plan source", s)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Whether a plan schedules exercises or meals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Workout,
    Meal,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workout => "workout",
            Self::Meal => "meal",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workout" => Ok(Self::Workout),
            "meal" => Ok(Self::Meal),
            _ => Err(ParseEnumError::new("plan kind", s)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Bucket that materialized daily rows and stats are filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Manual,
    AiGenerated,
    TrainerAssigned,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AiGenerated => "ai_generated",
            Self::TrainerAssigned => "trainer_assigned",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "ai_generated" => Ok(Self::AiGenerated),
            "trainer_assigned" => Ok(Self::TrainerAssigned),
            _ => Err(ParseEnumError::new("plan type", s)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Role of the authenticated caller, as reported by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubmitterRole {
    Trainer,
    Admin,
    Member,
}

impl SubmitterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trainer => "trainer",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for SubmitterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmitterRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trainer" => Ok(Self::Trainer),
            "admin" => Ok(Self::Admin),
            "member" | "user" => Ok(Self::Member),
            _ => Err(ParseEnumError::new("submitter role", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A submitted plan awaiting (or past) approval.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanRequest {
    pub id: Uuid,
    pub gym_id: i64,
    pub user_id: i64,
    pub submitted_by: i64,
    pub submitter_role: SubmitterRole,
    pub source: PlanSource,
    pub kind: PlanKind,
    pub category: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub items: serde_json::Value,
    pub source_plan_id: i64,
    pub approval_status: ApprovalStatus,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The status-tracking row for one plan request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanApproval {
    pub id: Uuid,
    pub plan_request_id: Uuid,
    pub gym_id: i64,
    pub user_id: i64,
    pub source_plan_id: i64,
    pub source: PlanSource,
    pub kind: PlanKind,
    pub category: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: ApprovalStatus,
    pub notes: String,
    pub all_items: Option<serde_json::Value>,
    /// Older submissions stored their items here instead of `all_items`.
    pub exercise_details: Option<serde_json::Value>,
    pub distributed_plan: Option<serde_json::Value>,
    pub decided_by: Option<i64>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A materialized day of a user's approved plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyPlan {
    pub id: Uuid,
    pub user_id: i64,
    pub gym_id: i64,
    pub plan_type: PlanType,
    pub source_plan_id: Option<i64>,
    pub approval_id: Option<Uuid>,
    pub day_number: Option<i32>,
    pub plan_date: Option<NaiveDate>,
    pub items: serde_json::Value,
    pub totals: serde_json::Value,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The singleton aggregate row for one (user, plan type).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StatsRow {
    pub id: Uuid,
    pub user_id: i64,
    pub gym_id: i64,
    pub plan_type: PlanType,
    pub stats: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// A web-authored plan, optionally assigned to a member.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssignedPlan {
    pub id: Uuid,
    pub gym_id: i64,
    pub assigned_user_id: Option<i64>,
    pub created_by: i64,
    pub kind: PlanKind,
    pub category: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub items: serde_json::Value,
    pub distributed_plan: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mobile-facing copy of an [`AssignedPlan`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MobilePlan {
    pub id: Uuid,
    pub primary_plan_id: Uuid,
    pub gym_id: i64,
    pub user_id: i64,
    pub kind: PlanKind,
    pub category: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: i32,
    pub total_items: i32,
    pub total_minutes: f64,
    pub total_calories: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One item row of a [`MobilePlan`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MobilePlanItem {
    pub id: Uuid,
    pub mobile_plan_id: Uuid,
    pub position: i32,
    pub day_number: Option<i32>,
    pub item_date: Option<NaiveDate>,
    pub name: String,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
