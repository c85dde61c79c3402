//! Read-side queries for callers: request status, daily rows and stats.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use gymplan_db::models::{
    ApprovalStatus, DailyPlan, PlanApproval, PlanKind, PlanRequest, PlanType, StatsRow,
};
use gymplan_db::queries::{approvals, daily_plans, plan_requests};

use crate::caller::Caller;
use crate::distribution::{self, DistributedPlan};
use crate::error::PlanError;
use crate::item;

/// A plan request with everything derived from it so far.
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub request: PlanRequest,
    pub status: ApprovalStatus,
    pub approval: Option<PlanApproval>,
    pub distributed_plan: Option<DistributedPlan>,
    pub daily_plans: Vec<DailyPlan>,
}

pub async fn request_view(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
) -> Result<RequestView, PlanError> {
    let request = plan_requests::get_plan_request_in_gym(pool, caller.gym_id, request_id)
        .await?
        .ok_or_else(|| PlanError::not_found("plan request", request_id))?;
    caller.require_access_to(request.user_id)?;

    let approval = approvals::get_approval_for_request(pool, request.id).await?;
    let status = approval
        .as_ref()
        .map_or(request.approval_status, |a| a.status);

    let distributed_plan = approval
        .as_ref()
        .and_then(|a| a.distributed_plan.clone())
        .and_then(|snapshot| match serde_json::from_value(snapshot) {
            Ok(plan) => Some(plan),
            Err(err) => {
                warn!(request_id = %request.id, error = %err, "unreadable distributed plan");
                None
            }
        });

    let daily_plans = match &approval {
        Some(a) if a.status == ApprovalStatus::Approved => daily_plans::list_days_for_source(
            pool,
            request.user_id,
            request.source.plan_type(),
            request.source_plan_id,
        )
        .await?
        .into_iter()
        .filter(|d| d.approval_id == Some(a.id))
        .collect(),
        _ => Vec::new(),
    };

    Ok(RequestView {
        request,
        status,
        approval,
        distributed_plan,
        daily_plans,
    })
}

/// The singleton stats record for (user, plan type).
pub async fn stats_for(
    pool: &PgPool,
    caller: &Caller,
    user_id: i64,
    plan_type: PlanType,
) -> Result<StatsRow, PlanError> {
    caller.require_access_to(user_id)?;
    daily_plans::get_stats(pool, user_id, plan_type)
        .await?
        .filter(|s| s.gym_id == caller.gym_id)
        .ok_or_else(|| PlanError::not_found("stats", format!("{user_id}/{plan_type}")))
}

/// Materialized day rows for (user, plan type), in schedule order.
pub async fn daily_plans_for(
    pool: &PgPool,
    caller: &Caller,
    user_id: i64,
    plan_type: PlanType,
) -> Result<Vec<DailyPlan>, PlanError> {
    caller.require_access_to(user_id)?;
    let days = daily_plans::list_days(pool, user_id, plan_type).await?;
    Ok(days
        .into_iter()
        .filter(|d| d.gym_id == caller.gym_id)
        .collect())
}

/// Raw items and a window to distribute without persisting anything.
#[derive(Debug, Clone, Deserialize)]
pub struct PreviewRequest {
    #[serde(default = "default_kind")]
    pub kind: PlanKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub items: Vec<Value>,
}

fn default_kind() -> PlanKind {
    PlanKind::Workout
}

/// Dry run of the distribution engine.
pub fn preview(request: &PreviewRequest) -> Result<DistributedPlan, PlanError> {
    let items = item::normalize_items(request.kind, &request.items)?;
    Ok(distribution::distribute(
        &items,
        request.start_date,
        request.end_date,
    )?)
}
