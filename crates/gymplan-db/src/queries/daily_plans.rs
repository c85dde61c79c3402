//! Database query functions for the `daily_plans` table.
//!
//! The table holds two kinds of rows: per-day materialized plan rows,
//! unique on (user, day_number, plan_type, source_plan_id), and one stats
//! row per (user, plan_type) flagged with `is_stats`. Both are written with
//! upserts against their partial unique indexes.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{DailyPlan, PlanType, StatsRow};

const DAY_COLUMNS: &str = "id, user_id, gym_id, plan_type, source_plan_id, approval_id, \
     day_number, plan_date, items, totals, completed, completed_at, created_at, updated_at";

const STATS_COLUMNS: &str =
    "id, user_id, gym_id, plan_type, COALESCE(stats, '{}'::jsonb) AS stats, updated_at";

/// Column values for one materialized day.
#[derive(Debug, Clone)]
pub struct UpsertDay<'a> {
    pub user_id: i64,
    pub gym_id: i64,
    pub plan_type: PlanType,
    pub source_plan_id: i64,
    pub approval_id: Option<Uuid>,
    pub day_number: i32,
    pub plan_date: Option<NaiveDate>,
    pub items: &'a serde_json::Value,
    pub totals: &'a serde_json::Value,
}

/// Insert a day row, or replace the snapshot and totals of the existing
/// row with the same key. Completion state is left untouched.
pub async fn upsert_day<'e, E>(executor: E, day: &UpsertDay<'_>) -> Result<DailyPlan>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "INSERT INTO daily_plans \
             (user_id, gym_id, plan_type, is_stats, source_plan_id, approval_id, \
              day_number, plan_date, items, totals) \
         VALUES ($1, $2, $3, false, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (user_id, day_number, plan_type, source_plan_id) WHERE NOT is_stats \
         DO UPDATE SET \
             gym_id = EXCLUDED.gym_id, \
             approval_id = EXCLUDED.approval_id, \
             plan_date = EXCLUDED.plan_date, \
             items = EXCLUDED.items, \
             totals = EXCLUDED.totals, \
             updated_at = now() \
         RETURNING {DAY_COLUMNS}"
    );

    let row = sqlx::query_as::<_, DailyPlan>(&sql)
        .bind(day.user_id)
        .bind(day.gym_id)
        .bind(day.plan_type)
        .bind(day.source_plan_id)
        .bind(day.approval_id)
        .bind(day.day_number)
        .bind(day.plan_date)
        .bind(day.items)
        .bind(day.totals)
        .fetch_one(executor)
        .await
        .with_context(|| {
            format!(
                "failed to upsert day {} of source plan {} for user {}",
                day.day_number, day.source_plan_id, day.user_id
            )
        })?;

    Ok(row)
}

/// Fetch a single day row by ID. Stats rows are never returned.
pub async fn get_day<'e, E>(executor: E, id: Uuid) -> Result<Option<DailyPlan>>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {DAY_COLUMNS} FROM daily_plans WHERE id = $1 AND NOT is_stats");
    let row = sqlx::query_as::<_, DailyPlan>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch daily plan")?;

    Ok(row)
}

/// All day rows for a user and plan type, in schedule order.
pub async fn list_days<'e, E>(executor: E, user_id: i64, plan_type: PlanType) -> Result<Vec<DailyPlan>>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {DAY_COLUMNS} FROM daily_plans \
         WHERE user_id = $1 AND plan_type = $2 AND NOT is_stats \
         ORDER BY source_plan_id ASC, day_number ASC"
    );
    let rows = sqlx::query_as::<_, DailyPlan>(&sql)
        .bind(user_id)
        .bind(plan_type)
        .fetch_all(executor)
        .await
        .context("failed to list daily plans")?;

    Ok(rows)
}

/// Day rows materialized from one source plan.
pub async fn list_days_for_source<'e, E>(
    executor: E,
    user_id: i64,
    plan_type: PlanType,
    source_plan_id: i64,
) -> Result<Vec<DailyPlan>>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {DAY_COLUMNS} FROM daily_plans \
         WHERE user_id = $1 AND plan_type = $2 AND source_plan_id = $3 AND NOT is_stats \
         ORDER BY day_number ASC"
    );
    let rows = sqlx::query_as::<_, DailyPlan>(&sql)
        .bind(user_id)
        .bind(plan_type)
        .bind(source_plan_id)
        .fetch_all(executor)
        .await
        .context("failed to list daily plans for source plan")?;

    Ok(rows)
}

/// Delete the day rows of (user, plan type, source plan) numbered past
/// `last_day`. Returns the number of rows removed.
pub async fn delete_days_beyond<'e, E>(
    executor: E,
    user_id: i64,
    plan_type: PlanType,
    source_plan_id: i64,
    last_day: i32,
) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "DELETE FROM daily_plans \
         WHERE user_id = $1 AND plan_type = $2 AND source_plan_id = $3 \
           AND NOT is_stats AND day_number > $4",
    )
    .bind(user_id)
    .bind(plan_type)
    .bind(source_plan_id)
    .bind(last_day)
    .execute(executor)
    .await
    .context("failed to delete stale daily plans")?;

    Ok(result.rows_affected())
}

/// Serialize writers of one (user, plan type) until the surrounding
/// transaction ends. Must run inside a transaction.
pub async fn lock_user_plan_type<'e, E>(executor: E, user_id: i64, plan_type: PlanType) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text || ':' || $2, 0))")
        .bind(user_id)
        .bind(plan_type)
        .execute(executor)
        .await
        .context("failed to lock daily plans")?;

    Ok(())
}

/// Set or clear a day's completion flag. Only the owning user's row is
/// touched; returns `None` when no such row exists.
pub async fn set_completed<'e, E>(
    executor: E,
    id: Uuid,
    user_id: i64,
    completed: bool,
) -> Result<Option<DailyPlan>>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "UPDATE daily_plans \
         SET completed = $3, \
             completed_at = CASE WHEN $3 THEN COALESCE(completed_at, now()) ELSE NULL END, \
             updated_at = now() \
         WHERE id = $1 AND user_id = $2 AND NOT is_stats \
         RETURNING {DAY_COLUMNS}"
    );
    let row = sqlx::query_as::<_, DailyPlan>(&sql)
        .bind(id)
        .bind(user_id)
        .bind(completed)
        .fetch_optional(executor)
        .await
        .context("failed to update daily plan completion")?;

    Ok(row)
}

/// Write the stats row for (user, plan type), creating it on first use.
pub async fn upsert_stats<'e, E>(
    executor: E,
    user_id: i64,
    gym_id: i64,
    plan_type: PlanType,
    stats: &serde_json::Value,
) -> Result<StatsRow>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "INSERT INTO daily_plans (user_id, gym_id, plan_type, is_stats, stats) \
         VALUES ($1, $2, $3, true, $4) \
         ON CONFLICT (user_id, plan_type) WHERE is_stats \
         DO UPDATE SET \
             gym_id = EXCLUDED.gym_id, \
             stats = EXCLUDED.stats, \
             updated_at = now() \
         RETURNING {STATS_COLUMNS}"
    );
    let row = sqlx::query_as::<_, StatsRow>(&sql)
        .bind(user_id)
        .bind(gym_id)
        .bind(plan_type)
        .bind(stats)
        .fetch_one(executor)
        .await
        .with_context(|| format!("failed to upsert {plan_type} stats for user {user_id}"))?;

    Ok(row)
}

/// Fetch the stats row for (user, plan type).
pub async fn get_stats<'e, E>(executor: E, user_id: i64, plan_type: PlanType) -> Result<Option<StatsRow>>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {STATS_COLUMNS} FROM daily_plans \
         WHERE user_id = $1 AND plan_type = $2 AND is_stats"
    );
    let row = sqlx::query_as::<_, StatsRow>(&sql)
        .bind(user_id)
        .bind(plan_type)
        .fetch_optional(executor)
        .await
        .context("failed to fetch stats")?;

    Ok(row)
}

/// Number of stats rows for (user, plan type). Always 0 or 1.
pub async fn count_stats_rows<'e, E>(executor: E, user_id: i64, plan_type: PlanType) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM daily_plans \
         WHERE user_id = $1 AND plan_type = $2 AND is_stats",
    )
    .bind(user_id)
    .bind(plan_type)
    .fetch_one(executor)
    .await
    .context("failed to count stats rows")?;

    Ok(count)
}
