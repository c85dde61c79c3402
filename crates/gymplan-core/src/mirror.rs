//! Mirror synchronizer: keep the mobile copy of an assigned plan aligned
//! with the primary row.
//!
//! Every entry point is best-effort. Failures are logged as
//! [`MirrorSyncError`] and reported as [`MirrorOutcome::Failed`]; the
//! primary write they follow is never undone.

use anyhow::Context;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use gymplan_db::models::AssignedPlan;
use gymplan_db::queries::mobile_plans::{self as db, MobilePlanHeader, NewMobileItem};

use crate::distribution::{DistributedPlan, distribute};
use crate::item::normalize_item_list;

#[derive(Debug, Error)]
pub enum MirrorSyncError {
    #[error("mirror of plan {plan_id} has no usable schedule: {reason}")]
    Schedule { plan_id: Uuid, reason: String },

    #[error("failed to write mirror of plan {plan_id}: {reason}")]
    Write { plan_id: Uuid, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mirror")]
pub enum MirrorOutcome {
    Created,
    Updated { items_replaced: bool },
    Purged { removed: u64 },
    /// The plan has no assignee, so nothing is mirrored.
    Skipped,
    Failed,
}

/// Mirror a freshly created primary plan.
pub async fn on_created(pool: &PgPool, plan: &AssignedPlan) -> MirrorOutcome {
    let Some(user_id) = plan.assigned_user_id else {
        return MirrorOutcome::Skipped;
    };
    report(plan.id, create(pool, plan, user_id).await.map(|()| MirrorOutcome::Created))
}

/// Re-align the mirror after the primary changed from `before` to `after`.
pub async fn on_updated(pool: &PgPool, before: &AssignedPlan, after: &AssignedPlan) -> MirrorOutcome {
    let Some(user_id) = after.assigned_user_id else {
        return on_removed(pool, after).await;
    };
    report(after.id, update(pool, before, after, user_id).await)
}

/// Drop the mirror of a deleted or unassigned plan, including stray rows
/// left behind for templates.
pub async fn on_removed(pool: &PgPool, plan: &AssignedPlan) -> MirrorOutcome {
    let result = db::delete_by_primary(pool, plan.id)
        .await
        .map(|removed| MirrorOutcome::Purged { removed })
        .map_err(|err| write_error(plan.id, err));
    report(plan.id, result)
}

fn report(plan_id: Uuid, result: Result<MirrorOutcome, MirrorSyncError>) -> MirrorOutcome {
    match result {
        Ok(outcome) => {
            debug!(plan_id = %plan_id, outcome = ?outcome, "mirror synced");
            outcome
        }
        Err(err) => {
            error!(plan_id = %plan_id, error = %err, "mirror sync failed");
            MirrorOutcome::Failed
        }
    }
}

fn write_error(plan_id: Uuid, err: anyhow::Error) -> MirrorSyncError {
    MirrorSyncError::Write {
        plan_id,
        reason: format!("{err:#}"),
    }
}

async fn create(pool: &PgPool, plan: &AssignedPlan, user_id: i64) -> Result<(), MirrorSyncError> {
    let schedule = schedule(plan)?;
    let header = header(plan, user_id, &schedule);
    let items = mirror_items(&schedule);

    let write = async {
        let mut tx = pool.begin().await.context("failed to begin mirror transaction")?;
        let mirror = db::insert_mobile_plan(&mut *tx, &header).await?;
        db::insert_items(&mut tx, mirror.id, &items).await?;
        tx.commit().await.context("failed to commit mirror")?;
        anyhow::Ok(())
    };
    write.await.map_err(|err| write_error(plan.id, err))
}

async fn update(
    pool: &PgPool,
    before: &AssignedPlan,
    after: &AssignedPlan,
    user_id: i64,
) -> Result<MirrorOutcome, MirrorSyncError> {
    let existing = db::get_by_primary(pool, after.id)
        .await
        .map_err(|err| write_error(after.id, err))?;
    let Some(existing) = existing else {
        create(pool, after, user_id).await?;
        return Ok(MirrorOutcome::Created);
    };

    let schedule = schedule(after)?;
    let header = header(after, user_id, &schedule);
    let items_replaced = schedule_changed(before, after);

    let write = async {
        let mut tx = pool.begin().await.context("failed to begin mirror transaction")?;
        db::update_mobile_plan(&mut *tx, existing.id, &header).await?;
        if items_replaced {
            db::delete_items(&mut *tx, existing.id).await?;
            db::insert_items(&mut tx, existing.id, &mirror_items(&schedule)).await?;
        }
        tx.commit().await.context("failed to commit mirror")?;
        anyhow::Ok(())
    };
    write.await.map_err(|err| write_error(after.id, err))?;

    Ok(MirrorOutcome::Updated { items_replaced })
}

/// Whether anything that feeds item placement changed.
fn schedule_changed(before: &AssignedPlan, after: &AssignedPlan) -> bool {
    before.items != after.items
        || before.distributed_plan != after.distributed_plan
        || before.kind != after.kind
        || before.start_date != after.start_date
        || before.end_date != after.end_date
}

/// The day-by-day layout mirrored to mobile: explicit items when the plan
/// has any, otherwise the stored distributed-plan snapshot.
fn schedule(plan: &AssignedPlan) -> Result<DistributedPlan, MirrorSyncError> {
    let schedule_err = |reason: String| MirrorSyncError::Schedule {
        plan_id: plan.id,
        reason,
    };

    let items = normalize_item_list(plan.kind, &plan.items).map_err(|e| schedule_err(e.to_string()))?;
    match &plan.distributed_plan {
        Some(snapshot) if items.is_empty() => {
            serde_json::from_value(snapshot.clone()).map_err(|e| schedule_err(e.to_string()))
        }
        _ => distribute(&items, plan.start_date, plan.end_date)
            .map_err(|e| schedule_err(e.to_string())),
    }
}

fn header<'a>(plan: &'a AssignedPlan, user_id: i64, schedule: &DistributedPlan) -> MobilePlanHeader<'a> {
    MobilePlanHeader {
        primary_plan_id: plan.id,
        gym_id: plan.gym_id,
        user_id,
        kind: plan.kind,
        category: &plan.category,
        start_date: plan.start_date,
        end_date: plan.end_date,
        total_days: schedule.total_days as i32,
        total_items: schedule.total_items as i32,
        total_minutes: schedule.total_minutes,
        total_calories: schedule.total_calories,
    }
}

fn mirror_items(schedule: &DistributedPlan) -> Vec<NewMobileItem> {
    schedule
        .scheduled_items()
        .enumerate()
        .map(|(position, (day, item))| NewMobileItem {
            position: position as i32,
            day_number: Some(day.day_number as i32),
            item_date: Some(day.date),
            name: item.name.clone(),
            payload: serde_json::to_value(item).unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use gymplan_db::models::PlanKind;
    use serde_json::json;

    use super::*;

    fn plan(items: serde_json::Value) -> AssignedPlan {
        AssignedPlan {
            id: Uuid::new_v4(),
            gym_id: 1,
            assigned_user_id: Some(7),
            created_by: 2,
            kind: PlanKind::Workout,
            category: "strength".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 8).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            items,
            distributed_plan: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn explicit_items_are_distributed() {
        let p = plan(json!([{"name": "A"}, {"name": "B"}, {"name": "C"}, {"name": "D"}]));
        let items = mirror_items(&schedule(&p).unwrap());
        let layout: Vec<_> = items.iter().map(|i| (i.position, i.day_number, i.name.as_str())).collect();
        assert_eq!(
            layout,
            vec![
                (0, Some(1), "A"),
                (1, Some(1), "D"),
                (2, Some(2), "B"),
                (3, Some(3), "C"),
            ]
        );
    }

    #[test]
    fn snapshot_used_when_no_items() {
        let source = plan(json!([{"name": "Only"}]));
        let snapshot = serde_json::to_value(schedule(&source).unwrap()).unwrap();

        let mut p = plan(json!([]));
        p.distributed_plan = Some(snapshot);
        let items = mirror_items(&schedule(&p).unwrap());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Only");
    }

    #[test]
    fn unreadable_snapshot_is_a_schedule_error() {
        let mut p = plan(json!([]));
        p.distributed_plan = Some(json!({"days": "nope"}));
        assert!(matches!(schedule(&p), Err(MirrorSyncError::Schedule { .. })));
    }

    #[test]
    fn header_counts_come_from_schedule() {
        let p = plan(json!([{"name": "A", "minutes": 20}, {"name": "B", "minutes": "10"}]));
        let s = schedule(&p).unwrap();
        let h = header(&p, 7, &s);
        assert_eq!(h.total_days, 3);
        assert_eq!(h.total_items, 2);
        assert_eq!(h.total_minutes, 30.0);
    }

    #[test]
    fn only_schedule_inputs_count_as_changes() {
        let before = plan(json!([{"name": "A"}]));
        let mut renamed = before.clone();
        renamed.category = "cardio".into();
        assert!(!schedule_changed(&before, &renamed));

        let mut edited = before.clone();
        edited.items = json!([{"name": "B"}]);
        assert!(schedule_changed(&before, &edited));
    }
}
