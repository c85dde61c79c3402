//! Database query functions for the `assigned_plans` table.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{AssignedPlan, PlanKind};

/// Column values for a new or edited assigned plan.
#[derive(Debug, Clone)]
pub struct AssignedPlanFields<'a> {
    pub assigned_user_id: Option<i64>,
    pub kind: PlanKind,
    pub category: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub items: &'a serde_json::Value,
    pub distributed_plan: Option<&'a serde_json::Value>,
}

pub async fn insert_assigned_plan<'e, E>(
    executor: E,
    gym_id: i64,
    created_by: i64,
    fields: &AssignedPlanFields<'_>,
) -> Result<AssignedPlan>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, AssignedPlan>(
        "INSERT INTO assigned_plans \
             (gym_id, assigned_user_id, created_by, kind, category, start_date, end_date, \
              items, distributed_plan) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(gym_id)
    .bind(fields.assigned_user_id)
    .bind(created_by)
    .bind(fields.kind)
    .bind(fields.category)
    .bind(fields.start_date)
    .bind(fields.end_date)
    .bind(fields.items)
    .bind(fields.distributed_plan)
    .fetch_one(executor)
    .await
    .context("failed to insert assigned plan")?;

    Ok(plan)
}

pub async fn get_assigned_plan<'e, E>(executor: E, gym_id: i64, id: Uuid) -> Result<Option<AssignedPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, AssignedPlan>(
        "SELECT * FROM assigned_plans WHERE id = $1 AND gym_id = $2",
    )
    .bind(id)
    .bind(gym_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch assigned plan")?;

    Ok(plan)
}

/// Replace every editable column. Returns `None` if the plan is not in
/// this gym.
pub async fn update_assigned_plan<'e, E>(
    executor: E,
    gym_id: i64,
    id: Uuid,
    fields: &AssignedPlanFields<'_>,
) -> Result<Option<AssignedPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, AssignedPlan>(
        "UPDATE assigned_plans \
         SET assigned_user_id = $3, \
             kind = $4, \
             category = $5, \
             start_date = $6, \
             end_date = $7, \
             items = $8, \
             distributed_plan = $9, \
             updated_at = now() \
         WHERE id = $1 AND gym_id = $2 \
         RETURNING *",
    )
    .bind(id)
    .bind(gym_id)
    .bind(fields.assigned_user_id)
    .bind(fields.kind)
    .bind(fields.category)
    .bind(fields.start_date)
    .bind(fields.end_date)
    .bind(fields.items)
    .bind(fields.distributed_plan)
    .fetch_optional(executor)
    .await
    .context("failed to update assigned plan")?;

    Ok(plan)
}

/// Clear the assignee, keeping the plan as a template.
pub async fn clear_assignee<'e, E>(executor: E, gym_id: i64, id: Uuid) -> Result<Option<AssignedPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, AssignedPlan>(
        "UPDATE assigned_plans \
         SET assigned_user_id = NULL, updated_at = now() \
         WHERE id = $1 AND gym_id = $2 \
         RETURNING *",
    )
    .bind(id)
    .bind(gym_id)
    .fetch_optional(executor)
    .await
    .context("failed to clear plan assignee")?;

    Ok(plan)
}

pub async fn delete_assigned_plan<'e, E>(executor: E, gym_id: i64, id: Uuid) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM assigned_plans WHERE id = $1 AND gym_id = $2")
        .bind(id)
        .bind(gym_id)
        .execute(executor)
        .await
        .context("failed to delete assigned plan")?;

    Ok(result.rows_affected())
}
