//! Database query functions for the `mobile_plans` and `mobile_plan_items`
//! tables.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::{MobilePlan, MobilePlanItem, PlanKind};

/// Header values copied from the primary plan.
#[derive(Debug, Clone)]
pub struct MobilePlanHeader<'a> {
    pub primary_plan_id: Uuid,
    pub gym_id: i64,
    pub user_id: i64,
    pub kind: PlanKind,
    pub category: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: i32,
    pub total_items: i32,
    pub total_minutes: f64,
    pub total_calories: f64,
}

/// One mirror item, in list order.
#[derive(Debug, Clone)]
pub struct NewMobileItem {
    pub position: i32,
    pub day_number: Option<i32>,
    pub item_date: Option<NaiveDate>,
    pub name: String,
    pub payload: serde_json::Value,
}

pub async fn insert_mobile_plan<'e, E>(executor: E, header: &MobilePlanHeader<'_>) -> Result<MobilePlan>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, MobilePlan>(
        "INSERT INTO mobile_plans \
             (primary_plan_id, gym_id, user_id, kind, category, start_date, end_date, \
              total_days, total_items, total_minutes, total_calories) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(header.primary_plan_id)
    .bind(header.gym_id)
    .bind(header.user_id)
    .bind(header.kind)
    .bind(header.category)
    .bind(header.start_date)
    .bind(header.end_date)
    .bind(header.total_days)
    .bind(header.total_items)
    .bind(header.total_minutes)
    .bind(header.total_calories)
    .fetch_one(executor)
    .await
    .context("failed to insert mobile plan")?;

    Ok(plan)
}

/// Overwrite the header of an existing mirror plan.
pub async fn update_mobile_plan<'e, E>(
    executor: E,
    id: Uuid,
    header: &MobilePlanHeader<'_>,
) -> Result<Option<MobilePlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, MobilePlan>(
        "UPDATE mobile_plans \
         SET gym_id = $2, user_id = $3, kind = $4, category = $5, \
             start_date = $6, end_date = $7, total_days = $8, total_items = $9, \
             total_minutes = $10, total_calories = $11, updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(header.gym_id)
    .bind(header.user_id)
    .bind(header.kind)
    .bind(header.category)
    .bind(header.start_date)
    .bind(header.end_date)
    .bind(header.total_days)
    .bind(header.total_items)
    .bind(header.total_minutes)
    .bind(header.total_calories)
    .fetch_optional(executor)
    .await
    .context("failed to update mobile plan")?;

    Ok(plan)
}

/// Look up the mirror of a primary plan via its back-reference.
pub async fn get_by_primary<'e, E>(executor: E, primary_plan_id: Uuid) -> Result<Option<MobilePlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, MobilePlan>(
        "SELECT * FROM mobile_plans WHERE primary_plan_id = $1",
    )
    .bind(primary_plan_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch mobile plan")?;

    Ok(plan)
}

/// Insert mirror items one row at a time on the given connection.
pub async fn insert_items(
    conn: &mut PgConnection,
    mobile_plan_id: Uuid,
    items: &[NewMobileItem],
) -> Result<()> {
    for item in items {
        sqlx::query(
            "INSERT INTO mobile_plan_items \
                 (mobile_plan_id, position, day_number, item_date, name, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(mobile_plan_id)
        .bind(item.position)
        .bind(item.day_number)
        .bind(item.item_date)
        .bind(&item.name)
        .bind(&item.payload)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert mobile plan item {:?}", item.name))?;
    }

    Ok(())
}

/// Remove every item of a mirror plan.
pub async fn delete_items<'e, E>(executor: E, mobile_plan_id: Uuid) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM mobile_plan_items WHERE mobile_plan_id = $1")
        .bind(mobile_plan_id)
        .execute(executor)
        .await
        .context("failed to delete mobile plan items")?;

    Ok(result.rows_affected())
}

/// Delete the mirror of a primary plan; its items go with it.
pub async fn delete_by_primary<'e, E>(executor: E, primary_plan_id: Uuid) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM mobile_plans WHERE primary_plan_id = $1")
        .bind(primary_plan_id)
        .execute(executor)
        .await
        .context("failed to delete mobile plan")?;

    Ok(result.rows_affected())
}

pub async fn list_items<'e, E>(executor: E, mobile_plan_id: Uuid) -> Result<Vec<MobilePlanItem>>
where
    E: PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, MobilePlanItem>(
        "SELECT * FROM mobile_plan_items WHERE mobile_plan_id = $1 ORDER BY position ASC",
    )
    .bind(mobile_plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list mobile plan items")?;

    Ok(items)
}
