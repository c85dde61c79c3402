//! Database query functions for the `plan_approvals` table.
//!
//! Status changes are conditional updates (`... AND status = 'pending'`),
//! so two concurrent deciders cannot both win.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{ApprovalStatus, PlanApproval, PlanKind, PlanSource};

/// Name of the partial unique index guarding one PENDING row per source.
pub const PENDING_UNIQUE_INDEX: &str = "uq_plan_approvals_pending";

/// Column values for a new PENDING approval record.
#[derive(Debug, Clone)]
pub struct NewApproval<'a> {
    pub plan_request_id: Uuid,
    pub gym_id: i64,
    pub user_id: i64,
    pub source_plan_id: i64,
    pub source: PlanSource,
    pub kind: PlanKind,
    pub category: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub all_items: &'a serde_json::Value,
}

/// Insert a PENDING approval record.
///
/// Fails with a unique violation on [`PENDING_UNIQUE_INDEX`] if another
/// PENDING record exists for the same (gym, source plan).
pub async fn insert_approval<'e, E>(executor: E, new: &NewApproval<'_>) -> Result<PlanApproval>
where
    E: PgExecutor<'e>,
{
    let approval = sqlx::query_as::<_, PlanApproval>(
        "INSERT INTO plan_approvals \
             (plan_request_id, gym_id, user_id, source_plan_id, source, kind, category, \
              start_date, end_date, all_items) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(new.plan_request_id)
    .bind(new.gym_id)
    .bind(new.user_id)
    .bind(new.source_plan_id)
    .bind(new.source)
    .bind(new.kind)
    .bind(new.category)
    .bind(new.start_date)
    .bind(new.end_date)
    .bind(new.all_items)
    .fetch_one(executor)
    .await
    .context("failed to insert plan approval")?;

    Ok(approval)
}

/// Whether an error (anywhere in its chain) is a unique violation of the
/// pending-per-source index.
pub fn is_pending_conflict(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<sqlx::Error>())
        .any(|e| match e {
            sqlx::Error::Database(db) => {
                db.is_unique_violation() && db.constraint() == Some(PENDING_UNIQUE_INDEX)
            }
            _ => false,
        })
}

/// Move every PENDING record of `user_id` for (gym, source plan) to
/// SUPERSEDED, appending `note` to its audit notes. Returns the superseded
/// rows.
pub async fn supersede_pending<'e, E>(
    executor: E,
    gym_id: i64,
    user_id: i64,
    source_plan_id: i64,
    note: &str,
) -> Result<Vec<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, PlanApproval>(
        "UPDATE plan_approvals \
         SET status = 'superseded', \
             notes = CASE WHEN notes = '' THEN $3 ELSE notes || E'\\n' || $3 END, \
             updated_at = now() \
         WHERE gym_id = $1 AND source_plan_id = $2 AND user_id = $4 AND status = 'pending' \
         RETURNING *",
    )
    .bind(gym_id)
    .bind(source_plan_id)
    .bind(note)
    .bind(user_id)
    .fetch_all(executor)
    .await
    .context("failed to supersede pending approvals")?;

    Ok(rows)
}

/// Fetch an approval record by ID.
pub async fn get_approval<'e, E>(executor: E, id: Uuid) -> Result<Option<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let approval = sqlx::query_as::<_, PlanApproval>("SELECT * FROM plan_approvals WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch plan approval")?;

    Ok(approval)
}

/// Fetch an approval record by ID, scoped to a gym.
pub async fn get_approval_in_gym<'e, E>(
    executor: E,
    gym_id: i64,
    id: Uuid,
) -> Result<Option<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let approval = sqlx::query_as::<_, PlanApproval>(
        "SELECT * FROM plan_approvals WHERE id = $1 AND gym_id = $2",
    )
    .bind(id)
    .bind(gym_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch plan approval")?;

    Ok(approval)
}

/// Fetch the approval record governing a plan request.
pub async fn get_approval_for_request<'e, E>(
    executor: E,
    plan_request_id: Uuid,
) -> Result<Option<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let approval = sqlx::query_as::<_, PlanApproval>(
        "SELECT * FROM plan_approvals WHERE plan_request_id = $1 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(plan_request_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch approval for plan request")?;

    Ok(approval)
}

/// List approvals in a gym, optionally filtered by status, oldest first.
pub async fn list_approvals<'e, E>(
    executor: E,
    gym_id: i64,
    status: Option<ApprovalStatus>,
) -> Result<Vec<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let approvals = sqlx::query_as::<_, PlanApproval>(
        "SELECT * FROM plan_approvals \
         WHERE gym_id = $1 AND ($2::text IS NULL OR status = $2) \
         ORDER BY created_at ASC",
    )
    .bind(gym_id)
    .bind(status)
    .fetch_all(executor)
    .await
    .context("failed to list plan approvals")?;

    Ok(approvals)
}

/// All approval records ever created for one (gym, source plan).
pub async fn list_for_source<'e, E>(
    executor: E,
    gym_id: i64,
    source_plan_id: i64,
) -> Result<Vec<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let approvals = sqlx::query_as::<_, PlanApproval>(
        "SELECT * FROM plan_approvals \
         WHERE gym_id = $1 AND source_plan_id = $2 \
         ORDER BY created_at ASC",
    )
    .bind(gym_id)
    .bind(source_plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list approvals for source plan")?;

    Ok(approvals)
}

/// Conditionally move a PENDING record to APPROVED, storing the computed
/// schedule. Returns `None` when the record is missing, belongs to another
/// gym, or is no longer PENDING.
pub async fn approve_pending<'e, E>(
    executor: E,
    id: Uuid,
    gym_id: i64,
    decided_by: i64,
    distributed_plan: &serde_json::Value,
) -> Result<Option<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let approval = sqlx::query_as::<_, PlanApproval>(
        "UPDATE plan_approvals \
         SET status = 'approved', \
             distributed_plan = $4, \
             decided_by = $3, \
             decided_at = now(), \
             updated_at = now() \
         WHERE id = $1 AND gym_id = $2 AND status = 'pending' \
         RETURNING *",
    )
    .bind(id)
    .bind(gym_id)
    .bind(decided_by)
    .bind(distributed_plan)
    .fetch_optional(executor)
    .await
    .context("failed to approve plan approval")?;

    Ok(approval)
}

/// Conditionally move a PENDING record to REJECTED, appending `note` when
/// given. Returns `None` under the same conditions as [`approve_pending`].
pub async fn reject_pending<'e, E>(
    executor: E,
    id: Uuid,
    gym_id: i64,
    decided_by: i64,
    note: Option<&str>,
) -> Result<Option<PlanApproval>>
where
    E: PgExecutor<'e>,
{
    let approval = sqlx::query_as::<_, PlanApproval>(
        "UPDATE plan_approvals \
         SET status = 'rejected', \
             notes = CASE \
                 WHEN $4::text IS NULL THEN notes \
                 WHEN notes = '' THEN $4 \
                 ELSE notes || E'\\n' || $4 END, \
             decided_by = $3, \
             decided_at = now(), \
             updated_at = now() \
         WHERE id = $1 AND gym_id = $2 AND status = 'pending' \
         RETURNING *",
    )
    .bind(id)
    .bind(gym_id)
    .bind(decided_by)
    .bind(note)
    .fetch_optional(executor)
    .await
    .context("failed to reject plan approval")?;

    Ok(approval)
}

/// Append a line to an approval's audit notes regardless of status.
pub async fn append_note<'e, E>(executor: E, id: Uuid, note: &str) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE plan_approvals \
         SET notes = CASE WHEN notes = '' THEN $2 ELSE notes || E'\\n' || $2 END, \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(note)
    .execute(executor)
    .await
    .context("failed to append approval note")?;

    Ok(result.rows_affected())
}
