//! Web-authored (assigned) plans.
//!
//! Each operation writes the primary row first, then hands off to the
//! [`mirror`](crate::mirror) synchronizer. Mirror failures are logged there
//! and never fail the primary write.

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use gymplan_db::models::{AssignedPlan, PlanKind};
use gymplan_db::queries::assigned_plans::{self as db, AssignedPlanFields};

use crate::caller::Caller;
use crate::context::PlanContext;
use crate::distribution::{DistributedPlan, span_days};
use crate::error::PlanError;
use crate::item::normalize_items;
use crate::mirror::{self, MirrorOutcome};
use crate::notify::{EventEntity, EventKind, PlanEvent};

fn default_kind() -> PlanKind {
    PlanKind::Workout
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedPlanInput {
    #[serde(default)]
    pub assigned_user_id: Option<i64>,
    #[serde(default = "default_kind")]
    pub kind: PlanKind,
    pub category: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub items: Vec<Value>,
    /// Precomputed schedule, used for the mirror when `items` is empty.
    #[serde(default)]
    pub distributed_plan: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignedPlanWrite {
    pub plan: AssignedPlan,
    pub mirror: MirrorOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignedPlanRemoved {
    pub id: Uuid,
    pub mirror: MirrorOutcome,
}

struct CheckedInput {
    category: String,
    items: Value,
}

fn check(input: &AssignedPlanInput) -> Result<CheckedInput, PlanError> {
    let category = input.category.trim();
    if category.is_empty() {
        return Err(PlanError::validation("category is required"));
    }
    span_days(input.start_date, input.end_date)?;

    let items = normalize_items(input.kind, &input.items)?;
    if let Some(snapshot) = &input.distributed_plan {
        serde_json::from_value::<DistributedPlan>(snapshot.clone())
            .map_err(|e| PlanError::validation(format!("distributed_plan is malformed: {e}")))?;
    }

    Ok(CheckedInput {
        category: category.to_owned(),
        items: serde_json::to_value(&items).context("failed to encode normalized items")?,
    })
}

fn fields<'a>(input: &'a AssignedPlanInput, checked: &'a CheckedInput) -> AssignedPlanFields<'a> {
    AssignedPlanFields {
        assigned_user_id: input.assigned_user_id,
        kind: input.kind,
        category: &checked.category,
        start_date: input.start_date,
        end_date: input.end_date,
        items: &checked.items,
        distributed_plan: input.distributed_plan.as_ref(),
    }
}

fn emit(ctx: &PlanContext, kind: EventKind, plan: &AssignedPlan) {
    ctx.notifier.emit(
        PlanEvent::new(kind, EventEntity::AssignedPlan, plan.id, plan.gym_id)
            .for_user(plan.assigned_user_id),
    );
}

async fn fetch(pool: &PgPool, caller: &Caller, id: Uuid) -> Result<AssignedPlan, PlanError> {
    db::get_assigned_plan(pool, caller.gym_id, id)
        .await?
        .ok_or_else(|| PlanError::not_found("assigned plan", id))
}

pub async fn create_assigned_plan(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    input: &AssignedPlanInput,
) -> Result<AssignedPlanWrite, PlanError> {
    caller.require_staff("author assigned plans")?;
    let checked = check(input)?;

    let plan =
        db::insert_assigned_plan(pool, caller.gym_id, caller.user_id, &fields(input, &checked))
            .await?;
    info!(plan_id = %plan.id, assigned_user_id = ?plan.assigned_user_id, "assigned plan created");

    let mirror = mirror::on_created(pool, &plan).await;
    emit(ctx, EventKind::Created, &plan);
    Ok(AssignedPlanWrite { plan, mirror })
}

pub async fn update_assigned_plan(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    id: Uuid,
    input: &AssignedPlanInput,
) -> Result<AssignedPlanWrite, PlanError> {
    caller.require_staff("edit assigned plans")?;
    let checked = check(input)?;
    let before = fetch(pool, caller, id).await?;

    let plan = db::update_assigned_plan(pool, caller.gym_id, id, &fields(input, &checked))
        .await?
        .ok_or_else(|| PlanError::not_found("assigned plan", id))?;
    info!(plan_id = %plan.id, "assigned plan updated");

    let mirror = mirror::on_updated(pool, &before, &plan).await;
    emit(ctx, EventKind::Updated, &plan);
    Ok(AssignedPlanWrite { plan, mirror })
}

pub async fn delete_assigned_plan(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    id: Uuid,
) -> Result<AssignedPlanRemoved, PlanError> {
    caller.require_staff("delete assigned plans")?;
    let plan = fetch(pool, caller, id).await?;

    if db::delete_assigned_plan(pool, caller.gym_id, id).await? == 0 {
        return Err(PlanError::not_found("assigned plan", id));
    }
    info!(plan_id = %id, "assigned plan deleted");

    let mirror = mirror::on_removed(pool, &plan).await;
    emit(ctx, EventKind::Deleted, &plan);
    Ok(AssignedPlanRemoved { id, mirror })
}

/// Detach the member from a plan, keeping it as a template.
pub async fn unassign_plan(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    id: Uuid,
) -> Result<AssignedPlanWrite, PlanError> {
    caller.require_staff("unassign plans")?;

    let plan = db::clear_assignee(pool, caller.gym_id, id)
        .await?
        .ok_or_else(|| PlanError::not_found("assigned plan", id))?;
    info!(plan_id = %id, "assigned plan unassigned");

    let mirror = mirror::on_removed(pool, &plan).await;
    emit(ctx, EventKind::Updated, &plan);
    Ok(AssignedPlanWrite { plan, mirror })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn input() -> AssignedPlanInput {
        serde_json::from_value(json!({
            "assigned_user_id": 7,
            "category": "hypertrophy",
            "start_date": "2025-03-01",
            "end_date": "2025-03-07",
            "items": [{"exercise_name": "Curl", "weight_kg": "12"}],
        }))
        .unwrap()
    }

    #[test]
    fn check_stores_normalized_items() {
        let checked = check(&input()).unwrap();
        assert_eq!(checked.items[0]["name"], "Curl");
        assert_eq!(checked.items[0]["weight"], 12.0);
    }

    #[test]
    fn check_rejects_malformed_snapshot() {
        let mut i = input();
        i.distributed_plan = Some(json!({"days": 3}));
        assert!(matches!(check(&i), Err(PlanError::Validation(_))));
    }

    #[test]
    fn check_rejects_reversed_range() {
        let mut i = input();
        i.end_date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert!(matches!(check(&i), Err(PlanError::InvalidRange { .. })));
    }
}
