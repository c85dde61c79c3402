//! Integration tests for the materializer: day-row upserts, the singleton
//! stats record and day completion.

use std::sync::Arc;

use chrono::NaiveDate;

use gymplan_db::models::{PlanType, SubmitterRole};
use gymplan_db::queries::daily_plans;

use gymplan_core::distribution::distribute;
use gymplan_core::item::Item;
use gymplan_core::materialize::stats::{PlanStats, StatsOptions};
use gymplan_core::materialize::{self, MaterializeTarget};
use gymplan_core::notify::NoopSink;
use gymplan_core::{Caller, PlanContext, PlanError};
use gymplan_test_utils::{create_test_db, drop_test_db};

const GYM: i64 = 1;
const USER: i64 = 42;

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, m, day).unwrap()
}

fn target(source_plan_id: i64) -> MaterializeTarget {
    MaterializeTarget {
        user_id: USER,
        gym_id: GYM,
        plan_type: PlanType::TrainerAssigned,
        source_plan_id,
        approval_id: None,
    }
}

fn items(names: &[&str]) -> Vec<Item> {
    names
        .iter()
        .map(|n| Item::workout(*n).with_minutes(20.0).with_categories(["legs"]))
        .collect()
}

fn ctx() -> PlanContext {
    PlanContext::new(Arc::new(NoopSink))
}

#[tokio::test]
async fn materializing_twice_is_idempotent() {
    let (pool, db_name) = create_test_db().await;
    let plan = distribute(&items(&["Squat", "Lunge", "Press"]), d(3, 1), d(3, 3)).unwrap();
    let opts = StatsOptions::default();

    materialize::materialize(&pool, &target(500), &plan, &opts).await.unwrap();
    let first = daily_plans::list_days(&pool, USER, PlanType::TrainerAssigned)
        .await
        .unwrap();

    let summary = materialize::materialize(&pool, &target(500), &plan, &opts)
        .await
        .unwrap();
    let second = daily_plans::list_days(&pool, USER, PlanType::TrainerAssigned)
        .await
        .unwrap();

    assert_eq!(summary.days_written, 3);
    assert_eq!(first.len(), 3);
    let ids = |rows: &[gymplan_db::models::DailyPlan]| rows.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(summary.stats.total_items, 3);
    assert_eq!(
        daily_plans::count_stats_rows(&pool, USER, PlanType::TrainerAssigned)
            .await
            .unwrap(),
        1
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stats_stay_singular_across_plans() {
    let (pool, db_name) = create_test_db().await;
    let opts = StatsOptions::default();

    for source in 0..4 {
        let plan = distribute(&items(&["Row", "Pull"]), d(4, 1), d(4, 2)).unwrap();
        materialize::materialize(&pool, &target(600 + source), &plan, &opts)
            .await
            .unwrap();
    }

    assert_eq!(
        daily_plans::count_stats_rows(&pool, USER, PlanType::TrainerAssigned)
            .await
            .unwrap(),
        1
    );
    let row = daily_plans::get_stats(&pool, USER, PlanType::TrainerAssigned)
        .await
        .unwrap()
        .unwrap();
    let stats: PlanStats = serde_json::from_value(row.stats).unwrap();
    assert_eq!(stats.total_days, 8);
    assert_eq!(stats.total_items, 8);
    assert_eq!(stats.total_minutes, 160.0);

    // Other plan types keep their own record.
    assert_eq!(
        daily_plans::count_stats_rows(&pool, USER, PlanType::Manual)
            .await
            .unwrap(),
        0
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn completing_a_day_touches_only_that_row() {
    let (pool, db_name) = create_test_db().await;
    let plan = distribute(&items(&["Squat", "Lunge"]), d(5, 1), d(5, 2)).unwrap();
    materialize::materialize(&pool, &target(700), &plan, &StatsOptions::default())
        .await
        .unwrap();

    let days = daily_plans::list_days(&pool, USER, PlanType::TrainerAssigned)
        .await
        .unwrap();
    let me = Caller::new(USER, GYM, SubmitterRole::Member);

    let done = materialize::mark_day_complete(&pool, &ctx(), &me, days[0].id, true)
        .await
        .unwrap();
    assert!(done.day.completed);
    assert!(done.day.completed_at.is_some());
    assert_eq!(done.day.items, days[0].items);
    assert_eq!(done.stats.as_ref().unwrap().completed_days, 1);
    assert!(done.warning.is_none());

    let after = daily_plans::list_days(&pool, USER, PlanType::TrainerAssigned)
        .await
        .unwrap();
    assert!(!after[1].completed);
    assert_eq!(after[1].items, days[1].items);
    assert_eq!(after[1].updated_at, days[1].updated_at);

    let undone = materialize::mark_day_complete(&pool, &ctx(), &me, days[0].id, false)
        .await
        .unwrap();
    assert!(!undone.day.completed);
    assert!(undone.day.completed_at.is_none());
    assert_eq!(undone.stats.unwrap().completed_days, 0);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rematerializing_keeps_completion() {
    let (pool, db_name) = create_test_db().await;
    let plan = distribute(&items(&["Squat"]), d(6, 1), d(6, 1)).unwrap();
    let opts = StatsOptions::default();
    materialize::materialize(&pool, &target(800), &plan, &opts).await.unwrap();

    let day = daily_plans::list_days(&pool, USER, PlanType::TrainerAssigned)
        .await
        .unwrap()
        .remove(0);
    daily_plans::set_completed(&pool, day.id, USER, true).await.unwrap();

    let replanned = distribute(&items(&["Squat", "Deadlift"]), d(6, 1), d(6, 1)).unwrap();
    let summary = materialize::materialize(&pool, &target(800), &replanned, &opts)
        .await
        .unwrap();
    let day = daily_plans::get_day(&pool, day.id).await.unwrap().unwrap();
    assert!(day.completed);
    assert_eq!(day.items.as_array().map(Vec::len), Some(2));
    assert_eq!(summary.stats.completed_items, 2);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn completion_is_scoped_to_gym_and_owner() {
    let (pool, db_name) = create_test_db().await;
    let plan = distribute(&items(&["Squat"]), d(7, 1), d(7, 1)).unwrap();
    materialize::materialize(&pool, &target(900), &plan, &StatsOptions::default())
        .await
        .unwrap();
    let day = daily_plans::list_days(&pool, USER, PlanType::TrainerAssigned)
        .await
        .unwrap()
        .remove(0);

    let other_gym = Caller::new(USER, GYM + 1, SubmitterRole::Member);
    let err = materialize::mark_day_complete(&pool, &ctx(), &other_gym, day.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::NotFound { .. }));

    let someone_else = Caller::new(USER + 1, GYM, SubmitterRole::Member);
    let err = materialize::mark_day_complete(&pool, &ctx(), &someone_else, day.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::Forbidden(_)));

    let trainer = Caller::new(2, GYM, SubmitterRole::Trainer);
    materialize::mark_day_complete(&pool, &ctx(), &trainer, day.id, true)
        .await
        .unwrap();

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn recompute_matches_stored_stats() {
    let (pool, db_name) = create_test_db().await;
    let plan = distribute(&items(&["Squat", "Row", "Squat"]), d(8, 1), d(8, 3)).unwrap();
    let opts = StatsOptions { recent_items: 1 };
    materialize::materialize(&pool, &target(1000), &plan, &opts).await.unwrap();

    let stats = materialize::recompute_stats(&pool, USER, GYM, PlanType::TrainerAssigned, &opts)
        .await
        .unwrap();
    assert_eq!(stats.total_items, 3);
    assert_eq!(stats.recent_items.len(), 1);

    let stored: PlanStats = serde_json::from_value(
        daily_plans::get_stats(&pool, USER, PlanType::TrainerAssigned)
            .await
            .unwrap()
            .unwrap()
            .stats,
    )
    .unwrap();
    assert_eq!(stored.total_items, stats.total_items);
    assert_eq!(stored.recent_items, stats.recent_items);

    drop_test_db(&db_name).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_materializations_leave_complete_stats() {
    let (pool, db_name) = create_test_db().await;
    let names: Vec<String> = (0..30).map(|i| format!("Drill {i}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let plan = distribute(&items(&names), d(4, 1), d(4, 30)).unwrap();
    assert_eq!(plan.total_days, 30);

    for round in 0..3_i64 {
        let user_id = 100 + round;
        let mut handles = Vec::new();
        for source in 0..8_i64 {
            let pool = pool.clone();
            let plan = plan.clone();
            let for_user = MaterializeTarget {
                user_id,
                ..target(source)
            };
            handles.push(tokio::spawn(async move {
                materialize::materialize(&pool, &for_user, &plan, &StatsOptions::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = daily_plans::list_days(&pool, user_id, PlanType::TrainerAssigned)
            .await
            .unwrap();
        assert_eq!(rows.len(), 240);
        let stored: PlanStats = serde_json::from_value(
            daily_plans::get_stats(&pool, user_id, PlanType::TrainerAssigned)
                .await
                .unwrap()
                .unwrap()
                .stats,
        )
        .unwrap();
        assert_eq!(stored.total_days, 240, "round {round}");
        assert_eq!(stored.total_items, 240, "round {round}");
    }

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn shorter_resubmission_drops_days_past_the_new_range() {
    let (pool, db_name) = create_test_db().await;
    let opts = StatsOptions::default();
    let week = distribute(&items(&["Squat", "Lunge"]), d(5, 1), d(5, 7)).unwrap();
    let short = distribute(&items(&["Press"]), d(5, 1), d(5, 3)).unwrap();

    let first = MaterializeTarget {
        approval_id: Some(uuid::Uuid::new_v4()),
        ..target(77)
    };
    materialize::materialize(&pool, &first, &week, &opts).await.unwrap();
    materialize::materialize(&pool, &target(78), &short, &opts).await.unwrap();

    let second = MaterializeTarget {
        approval_id: Some(uuid::Uuid::new_v4()),
        ..target(77)
    };
    let summary = materialize::materialize(&pool, &second, &short, &opts).await.unwrap();

    let rows = daily_plans::list_days_for_source(&pool, USER, PlanType::TrainerAssigned, 77)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.approval_id == second.approval_id));

    // Other sources keep their rows.
    let other = daily_plans::list_days_for_source(&pool, USER, PlanType::TrainerAssigned, 78)
        .await
        .unwrap();
    assert_eq!(other.len(), 3);
    assert_eq!(summary.stats.total_days, 6);

    drop_test_db(&db_name).await;
}
