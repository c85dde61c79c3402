//! Integration tests for assigned plans and their mobile mirror.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use gymplan_db::models::{PlanKind, SubmitterRole};
use gymplan_db::queries::mobile_plans;

use gymplan_core::assigned::{self, AssignedPlanInput};
use gymplan_core::distribution::distribute;
use gymplan_core::item::Item;
use gymplan_core::mirror::{self, MirrorOutcome};
use gymplan_core::notify::NoopSink;
use gymplan_core::{Caller, PlanContext, PlanError};
use gymplan_test_utils::{create_test_db, drop_test_db};

const GYM: i64 = 1;

fn trainer() -> Caller {
    Caller::new(2, GYM, SubmitterRole::Trainer)
}

fn ctx() -> PlanContext {
    PlanContext::new(Arc::new(NoopSink))
}

fn input(assignee: Option<i64>, items: Value) -> AssignedPlanInput {
    AssignedPlanInput {
        assigned_user_id: assignee,
        kind: PlanKind::Workout,
        category: "strength".into(),
        start_date: NaiveDate::from_ymd_opt(2025, 1, 8).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        items: serde_json::from_value(items).unwrap(),
        distributed_plan: None,
    }
}

async fn mirror_item_ids(pool: &PgPool, primary: Uuid) -> Vec<Uuid> {
    let mirror = mobile_plans::get_by_primary(pool, primary)
        .await
        .unwrap()
        .expect("mirror should exist");
    mobile_plans::list_items(pool, mirror.id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect()
}

#[tokio::test]
async fn create_mirrors_assigned_plans_only() {
    let (pool, db_name) = create_test_db().await;

    let assigned = assigned::create_assigned_plan(
        &pool,
        &ctx(),
        &trainer(),
        &input(Some(7), json!([{"name": "A", "minutes": 10}, {"name": "B"}, {"name": "C"}])),
    )
    .await
    .unwrap();
    assert_eq!(assigned.mirror, MirrorOutcome::Created);

    let mirror = mobile_plans::get_by_primary(&pool, assigned.plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror.user_id, 7);
    assert_eq!(mirror.total_days, 3);
    assert_eq!(mirror.total_items, 3);
    assert_eq!(mirror.total_minutes, 10.0);
    let items = mobile_plans::list_items(&pool, mirror.id).await.unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[1].day_number, Some(2));
    assert_eq!(items[1].name, "B");

    let template = assigned::create_assigned_plan(&pool, &ctx(), &trainer(), &input(None, json!([])))
        .await
        .unwrap();
    assert_eq!(template.mirror, MirrorOutcome::Skipped);
    assert!(
        mobile_plans::get_by_primary(&pool, template.plan.id)
            .await
            .unwrap()
            .is_none()
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_replaces_items_only_when_they_change() {
    let (pool, db_name) = create_test_db().await;
    let created = assigned::create_assigned_plan(
        &pool,
        &ctx(),
        &trainer(),
        &input(Some(7), json!([{"name": "A"}, {"name": "B"}])),
    )
    .await
    .unwrap();
    let id = created.plan.id;
    let original = mirror_item_ids(&pool, id).await;

    let mut renamed = input(Some(7), json!([{"name": "A"}, {"name": "B"}]));
    renamed.category = "power".into();
    let write = assigned::update_assigned_plan(&pool, &ctx(), &trainer(), id, &renamed)
        .await
        .unwrap();
    assert_eq!(write.mirror, MirrorOutcome::Updated { items_replaced: false });
    assert_eq!(mirror_item_ids(&pool, id).await, original);
    let mirror = mobile_plans::get_by_primary(&pool, id).await.unwrap().unwrap();
    assert_eq!(mirror.category, "power");

    let edited = input(Some(7), json!([{"name": "A"}, {"name": "C"}, {"name": "D"}]));
    let write = assigned::update_assigned_plan(&pool, &ctx(), &trainer(), id, &edited)
        .await
        .unwrap();
    assert_eq!(write.mirror, MirrorOutcome::Updated { items_replaced: true });
    let replaced = mirror_item_ids(&pool, id).await;
    assert_eq!(replaced.len(), 3);
    assert!(replaced.iter().all(|i| !original.contains(i)));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn assignee_changes_create_and_purge_the_mirror() {
    let (pool, db_name) = create_test_db().await;
    let created = assigned::create_assigned_plan(&pool, &ctx(), &trainer(), &input(None, json!([{"name": "A"}])))
        .await
        .unwrap();
    let id = created.plan.id;

    let write = assigned::update_assigned_plan(&pool, &ctx(), &trainer(), id, &input(Some(9), json!([{"name": "A"}])))
        .await
        .unwrap();
    assert_eq!(write.mirror, MirrorOutcome::Created);

    let write = assigned::update_assigned_plan(&pool, &ctx(), &trainer(), id, &input(None, json!([{"name": "A"}])))
        .await
        .unwrap();
    assert_eq!(write.mirror, MirrorOutcome::Purged { removed: 1 });
    assert!(mobile_plans::get_by_primary(&pool, id).await.unwrap().is_none());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unassign_and_delete_purge_the_mirror() {
    let (pool, db_name) = create_test_db().await;

    let a = assigned::create_assigned_plan(&pool, &ctx(), &trainer(), &input(Some(7), json!([{"name": "A"}])))
        .await
        .unwrap();
    let unassigned = assigned::unassign_plan(&pool, &ctx(), &trainer(), a.plan.id)
        .await
        .unwrap();
    assert_eq!(unassigned.plan.assigned_user_id, None);
    assert_eq!(unassigned.mirror, MirrorOutcome::Purged { removed: 1 });

    let b = assigned::create_assigned_plan(&pool, &ctx(), &trainer(), &input(Some(7), json!([{"name": "B"}])))
        .await
        .unwrap();
    let removed = assigned::delete_assigned_plan(&pool, &ctx(), &trainer(), b.plan.id)
        .await
        .unwrap();
    assert_eq!(removed.mirror, MirrorOutcome::Purged { removed: 1 });
    assert!(mobile_plans::get_by_primary(&pool, b.plan.id).await.unwrap().is_none());

    let err = assigned::delete_assigned_plan(&pool, &ctx(), &trainer(), b.plan.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::NotFound { .. }));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn snapshot_feeds_mirror_when_items_are_absent() {
    let (pool, db_name) = create_test_db().await;
    let start = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
    let schedule = distribute(&[Item::workout("Sled push").with_date(end)], start, end).unwrap();

    let mut plan = input(Some(7), json!([]));
    plan.distributed_plan = Some(serde_json::to_value(&schedule).unwrap());
    let created = assigned::create_assigned_plan(&pool, &ctx(), &trainer(), &plan)
        .await
        .unwrap();

    let mirror = mobile_plans::get_by_primary(&pool, created.plan.id)
        .await
        .unwrap()
        .unwrap();
    let items = mobile_plans::list_items(&pool, mirror.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].day_number, Some(3));
    assert_eq!(items[0].item_date, Some(end));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn mirror_failures_are_swallowed() {
    let (pool, db_name) = create_test_db().await;
    let created = assigned::create_assigned_plan(&pool, &ctx(), &trainer(), &input(Some(7), json!([{"name": "A"}])))
        .await
        .unwrap();

    // A second mirror for the same primary violates the back-reference key.
    let outcome = mirror::on_created(&pool, &created.plan).await;
    assert_eq!(outcome, MirrorOutcome::Failed);
    assert_eq!(mirror_item_ids(&pool, created.plan.id).await.len(), 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn members_cannot_author_plans() {
    let (pool, db_name) = create_test_db().await;
    let member = Caller::new(7, GYM, SubmitterRole::Member);
    let err = assigned::create_assigned_plan(&pool, &ctx(), &member, &input(Some(7), json!([])))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::Forbidden(_)));

    drop_test_db(&db_name).await;
}
