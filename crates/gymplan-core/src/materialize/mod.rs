//! Materializer: persist an approved schedule as per-day rows and keep the
//! per-(user, plan type) stats record in step.
//!
//! Day rows are upserted on (user, day_number, plan_type, source_plan_id),
//! so materializing the same plan twice leaves the same rows. The stats
//! record is recomputed from every non-stats row after the day writes, in
//! the same transaction. Every writer of a (user, plan type) holds a
//! transaction-scoped advisory lock, so the last recompute to commit has
//! seen every committed day row.

pub mod stats;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gymplan_db::models::{DailyPlan, PlanType};
use gymplan_db::queries::daily_plans::{self as db, UpsertDay};

use crate::caller::Caller;
use crate::context::PlanContext;
use crate::distribution::{DistributedPlan, Totals};
use crate::error::PlanError;
use crate::item::Item;
use crate::notify::{EventEntity, EventKind, PlanEvent};

use self::stats::{DayRecord, PlanStats, StatsOptions, compute_stats};

/// Failure while writing day rows or the stats record after an approval.
/// Reported as a warning; never reverts the approval.
#[derive(Debug, Error)]
pub enum MaterializationError {
    #[error("failed to write {plan_type} daily plans for user {user_id}: {reason}")]
    Days {
        user_id: i64,
        plan_type: PlanType,
        reason: String,
    },

    #[error("failed to recompute {plan_type} stats for user {user_id}: {reason}")]
    Stats {
        user_id: i64,
        plan_type: PlanType,
        reason: String,
    },
}

/// Whose rows a schedule is written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeTarget {
    pub user_id: i64,
    pub gym_id: i64,
    pub plan_type: PlanType,
    pub source_plan_id: i64,
    pub approval_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterializeSummary {
    pub days_written: usize,
    pub stats: PlanStats,
}

/// Result of flipping one day's completion flag.
#[derive(Debug, Clone, Serialize)]
pub struct DayCompletion {
    pub day: DailyPlan,
    pub stats: Option<PlanStats>,
    pub warning: Option<String>,
}

/// Write every day bucket of `plan` for `target`, then recompute stats.
pub async fn materialize(
    pool: &PgPool,
    target: &MaterializeTarget,
    plan: &DistributedPlan,
    options: &StatsOptions,
) -> Result<MaterializeSummary, MaterializationError> {
    let days_err = |err: anyhow::Error| MaterializationError::Days {
        user_id: target.user_id,
        plan_type: target.plan_type,
        reason: format!("{err:#}"),
    };

    let mut tx = pool
        .begin()
        .await
        .context("failed to begin materialization transaction")
        .map_err(days_err)?;

    db::lock_user_plan_type(&mut *tx, target.user_id, target.plan_type)
        .await
        .map_err(days_err)?;
    let days_written = write_days(&mut tx, target, plan).await.map_err(days_err)?;

    let stats = recompute_stats_on(
        &mut tx,
        target.user_id,
        target.gym_id,
        target.plan_type,
        options,
    )
    .await
    .map_err(|err| MaterializationError::Stats {
        user_id: target.user_id,
        plan_type: target.plan_type,
        reason: format!("{err:#}"),
    })?;

    tx.commit()
        .await
        .context("failed to commit materialization")
        .map_err(days_err)?;

    info!(
        user_id = target.user_id,
        plan_type = %target.plan_type,
        source_plan_id = target.source_plan_id,
        days_written,
        "plan materialized"
    );

    Ok(MaterializeSummary {
        days_written,
        stats,
    })
}

async fn write_days(
    conn: &mut PgConnection,
    target: &MaterializeTarget,
    plan: &DistributedPlan,
) -> Result<usize> {
    for bucket in &plan.days {
        let items = serde_json::to_value(&bucket.items).context("failed to encode day items")?;
        let totals = serde_json::to_value(bucket.totals).context("failed to encode day totals")?;
        db::upsert_day(
            &mut *conn,
            &UpsertDay {
                user_id: target.user_id,
                gym_id: target.gym_id,
                plan_type: target.plan_type,
                source_plan_id: target.source_plan_id,
                approval_id: target.approval_id,
                day_number: bucket.day_number as i32,
                plan_date: Some(bucket.date),
                items: &items,
                totals: &totals,
            },
        )
        .await?;
    }

    let stale = db::delete_days_beyond(
        &mut *conn,
        target.user_id,
        target.plan_type,
        target.source_plan_id,
        plan.total_days as i32,
    )
    .await?;
    if stale > 0 {
        debug!(
            user_id = target.user_id,
            source_plan_id = target.source_plan_id,
            stale,
            "removed days past the new schedule"
        );
    }
    Ok(plan.days.len())
}

/// Rebuild the stats record for (user, plan type) from its day rows.
pub async fn recompute_stats(
    pool: &PgPool,
    user_id: i64,
    gym_id: i64,
    plan_type: PlanType,
    options: &StatsOptions,
) -> Result<PlanStats, PlanError> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin stats transaction")?;
    db::lock_user_plan_type(&mut *tx, user_id, plan_type).await?;
    let stats = recompute_stats_on(&mut tx, user_id, gym_id, plan_type, options).await?;
    tx.commit().await.context("failed to commit stats")?;
    Ok(stats)
}

async fn recompute_stats_on(
    conn: &mut PgConnection,
    user_id: i64,
    gym_id: i64,
    plan_type: PlanType,
    options: &StatsOptions,
) -> Result<PlanStats> {
    let rows = db::list_days(&mut *conn, user_id, plan_type).await?;
    let records: Vec<DayRecord> = rows.iter().map(day_record).collect();

    let now = Utc::now();
    let stats = compute_stats(&records, now.date_naive(), now, options);
    let json = serde_json::to_value(&stats).context("failed to encode stats")?;
    db::upsert_stats(&mut *conn, user_id, gym_id, plan_type, &json).await?;

    debug!(user_id, plan_type = %plan_type, rows = records.len(), "stats recomputed");
    Ok(stats)
}

/// Decode a stored day row. Unreadable snapshots count as empty days.
pub(crate) fn day_record(row: &DailyPlan) -> DayRecord {
    let items: Vec<Item> = match serde_json::from_value(row.items.clone()) {
        Ok(items) => items,
        Err(err) => {
            warn!(daily_plan_id = %row.id, error = %err, "unreadable item snapshot");
            Vec::new()
        }
    };
    let totals = serde_json::from_value(row.totals.clone()).unwrap_or_else(|_| Totals::sum(&items));

    DayRecord {
        source_plan_id: row.source_plan_id.unwrap_or_default(),
        day_number: row.day_number.unwrap_or_default(),
        date: row.plan_date,
        items,
        totals,
        completed: row.completed,
        added_at: row.created_at,
    }
}

/// Set or clear the completion flag of one day row, then recompute stats.
///
/// Only the targeted row changes; other days keep their snapshots. A
/// failed stats recompute is returned as a warning.
pub async fn mark_day_complete(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    daily_plan_id: Uuid,
    completed: bool,
) -> Result<DayCompletion, PlanError> {
    let day = db::get_day(pool, daily_plan_id)
        .await?
        .filter(|d| d.gym_id == caller.gym_id)
        .ok_or_else(|| PlanError::not_found("daily plan", daily_plan_id))?;
    caller.require_access_to(day.user_id)?;

    let day = db::set_completed(pool, daily_plan_id, day.user_id, completed)
        .await?
        .ok_or_else(|| PlanError::not_found("daily plan", daily_plan_id))?;

    let (stats, warning) =
        match recompute_stats(pool, day.user_id, day.gym_id, day.plan_type, &ctx.stats).await {
            Ok(stats) => (Some(stats), None),
            Err(err) => {
                let err = MaterializationError::Stats {
                    user_id: day.user_id,
                    plan_type: day.plan_type,
                    reason: err.to_string(),
                };
                warn!(daily_plan_id = %day.id, error = %err, "stats recompute failed");
                (None, Some(err.to_string()))
            }
        };

    ctx.notifier.emit(
        PlanEvent::new(EventKind::Updated, EventEntity::DailyPlan, day.id, day.gym_id)
            .for_user(Some(day.user_id)),
    );

    Ok(DayCompletion {
        day,
        stats,
        warning,
    })
}
