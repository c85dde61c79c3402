//! Database query functions for the `plan_requests` table.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{ApprovalStatus, PlanKind, PlanRequest, PlanSource, SubmitterRole};

/// Column values for a new plan request.
#[derive(Debug, Clone)]
pub struct NewPlanRequest<'a> {
    pub gym_id: i64,
    pub user_id: i64,
    pub submitted_by: i64,
    pub submitter_role: SubmitterRole,
    pub source: PlanSource,
    pub kind: PlanKind,
    pub category: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub items: &'a serde_json::Value,
    /// `None` makes the request its own source plan: an id is drawn from
    /// `plan_source_seq`.
    pub source_plan_id: Option<i64>,
}

/// Insert a new plan request. Returns the row with server-generated
/// defaults (id, source_plan_id when absent, approval_status, created_at).
pub async fn insert_plan_request<'e, E>(executor: E, new: &NewPlanRequest<'_>) -> Result<PlanRequest>
where
    E: PgExecutor<'e>,
{
    let request = sqlx::query_as::<_, PlanRequest>(
        "INSERT INTO plan_requests \
             (gym_id, user_id, submitted_by, submitter_role, source, kind, category, \
              start_date, end_date, items, source_plan_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                 COALESCE($11, nextval('plan_source_seq'))) \
         RETURNING *",
    )
    .bind(new.gym_id)
    .bind(new.user_id)
    .bind(new.submitted_by)
    .bind(new.submitter_role)
    .bind(new.source)
    .bind(new.kind)
    .bind(new.category)
    .bind(new.start_date)
    .bind(new.end_date)
    .bind(new.items)
    .bind(new.source_plan_id)
    .fetch_one(executor)
    .await
    .context("failed to insert plan request")?;

    Ok(request)
}

/// Fetch a plan request by ID.
pub async fn get_plan_request<'e, E>(executor: E, id: Uuid) -> Result<Option<PlanRequest>>
where
    E: PgExecutor<'e>,
{
    let request = sqlx::query_as::<_, PlanRequest>("SELECT * FROM plan_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch plan request")?;

    Ok(request)
}

/// Fetch a plan request by ID, scoped to a gym.
pub async fn get_plan_request_in_gym<'e, E>(
    executor: E,
    gym_id: i64,
    id: Uuid,
) -> Result<Option<PlanRequest>>
where
    E: PgExecutor<'e>,
{
    let request = sqlx::query_as::<_, PlanRequest>(
        "SELECT * FROM plan_requests WHERE id = $1 AND gym_id = $2",
    )
    .bind(id)
    .bind(gym_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch plan request")?;

    Ok(request)
}

/// Another user who already owns requests under (gym, source plan), if any.
pub async fn other_source_owner<'e, E>(
    executor: E,
    gym_id: i64,
    source_plan_id: i64,
    user_id: i64,
) -> Result<Option<i64>>
where
    E: PgExecutor<'e>,
{
    let owner = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM plan_requests \
         WHERE gym_id = $1 AND source_plan_id = $2 AND user_id <> $3 \
         LIMIT 1",
    )
    .bind(gym_id)
    .bind(source_plan_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to look up source plan owner")?;

    Ok(owner)
}

/// Record the outcome of an approval decision on the request row.
///
/// `approved_by` / `approved_at` are only overwritten when given: approvals
/// pass the deciding user and time, rejections and supersedes pass `None`
/// and leave them empty. Returns the number of rows updated.
pub async fn set_approval_status<'e, E>(
    executor: E,
    id: Uuid,
    status: ApprovalStatus,
    approved_by: Option<i64>,
    approved_at: Option<DateTime<Utc>>,
) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE plan_requests \
         SET approval_status = $1, \
             approved_by = COALESCE($2, approved_by), \
             approved_at = COALESCE($3, approved_at) \
         WHERE id = $4",
    )
    .bind(status)
    .bind(approved_by)
    .bind(approved_at)
    .bind(id)
    .execute(executor)
    .await
    .context("failed to update plan request approval status")?;

    Ok(result.rows_affected())
}
