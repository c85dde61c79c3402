//! Integration tests for the embedded migrations.

use sqlx::Row;

use gymplan_db::pool;
use gymplan_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn migrations_create_every_table() {
    let (pool, db_name) = create_test_db().await;

    let counts = pool::table_counts(&pool).await.expect("counts should succeed");
    let names: Vec<_> = counts.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "plan_requests",
            "plan_approvals",
            "daily_plans",
            "assigned_plans",
            "mobile_plans",
            "mobile_plan_items",
        ]
    );
    assert!(counts.iter().all(|(_, n)| *n == 0));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    pool::run_migrations(&pool)
        .await
        .expect("re-running migrations should be a no-op");

    let row = sqlx::query("SELECT COUNT(*) AS n FROM _sqlx_migrations")
        .fetch_one(&pool)
        .await
        .unwrap();
    let applied: i64 = row.get("n");
    assert_eq!(applied, pool::MIGRATOR.iter().count() as i64);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn partial_unique_indexes_exist() {
    let (pool, db_name) = create_test_db().await;

    let names: Vec<String> = sqlx::query_scalar(
        "SELECT indexname FROM pg_indexes \
         WHERE indexname IN ('uq_plan_approvals_pending', 'uq_daily_plans_day', 'uq_daily_plans_stats') \
         ORDER BY indexname",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(
        names,
        vec![
            "uq_daily_plans_day",
            "uq_daily_plans_stats",
            "uq_plan_approvals_pending",
        ]
    );

    drop_test_db(&db_name).await;
}
