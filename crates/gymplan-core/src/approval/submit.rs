//! Plan submission: validate, supersede the previous pending record for the
//! same source plan, and store the new request as PENDING.

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

use gymplan_db::models::{ApprovalStatus, PlanApproval, PlanKind, PlanRequest, PlanSource};
use gymplan_db::queries::approvals::{self, NewApproval};
use gymplan_db::queries::plan_requests::{self, NewPlanRequest};

use crate::caller::Caller;
use crate::context::PlanContext;
use crate::distribution::span_days;
use crate::error::PlanError;
use crate::item::{Item, normalize_items};
use crate::notify::{EventEntity, EventKind, PlanEvent};

fn default_kind() -> PlanKind {
    PlanKind::Workout
}

/// A plan as submitted by a trainer, member or the AI generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSubmission {
    pub user_id: i64,
    pub source: PlanSource,
    #[serde(default = "default_kind")]
    pub kind: PlanKind,
    #[serde(default)]
    pub category: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub items: Vec<Value>,
    /// Resubmissions reuse the id of the plan they replace.
    #[serde(default)]
    pub source_plan_id: Option<i64>,
}

/// A submission that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub category: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submitted {
    pub request: PlanRequest,
    pub approval: PlanApproval,
    pub superseded: Vec<PlanApproval>,
}

impl PlanSubmission {
    /// Check required fields and normalize items. No state is touched.
    pub fn validate(&self) -> Result<ValidatedSubmission, PlanError> {
        let category = self.category.trim();
        if category.is_empty() {
            return Err(PlanError::validation("category is required"));
        }
        let start_date = self
            .start_date
            .ok_or_else(|| PlanError::validation("start_date is required"))?;
        let end_date = self
            .end_date
            .ok_or_else(|| PlanError::validation("end_date is required"))?;
        span_days(start_date, end_date)?;

        let items = normalize_items(self.kind, &self.items)?;

        Ok(ValidatedSubmission {
            category: category.to_owned(),
            start_date,
            end_date,
            items,
        })
    }
}

/// Store a new PENDING plan request.
///
/// Any PENDING record of the same user for the same (gym, source plan) is
/// superseded in the same transaction. Reusing a source plan id owned by
/// another user is forbidden. If a concurrent submit wins the pending slot first, the
/// supersede-then-insert is retried once.
pub async fn submit(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    submission: &PlanSubmission,
) -> Result<Submitted, PlanError> {
    caller.require_access_to(submission.user_id)?;
    let validated = submission.validate()?;

    if let Some(source_plan_id) = submission.source_plan_id {
        let owner = plan_requests::other_source_owner(
            pool,
            caller.gym_id,
            source_plan_id,
            submission.user_id,
        )
        .await?;
        if let Some(owner) = owner {
            warn!(
                gym_id = caller.gym_id,
                source_plan_id,
                owner,
                user_id = submission.user_id,
                "source plan belongs to another user"
            );
            return Err(PlanError::Forbidden(format!(
                "source plan {source_plan_id} belongs to another user"
            )));
        }
    }

    let raw_items = Value::Array(submission.items.clone());
    let all_items =
        serde_json::to_value(&validated.items).context("failed to encode normalized items")?;

    let mut retried = false;
    let submitted = loop {
        match insert_pending(pool, caller, submission, &validated, &raw_items, &all_items).await {
            Ok(submitted) => break submitted,
            Err(err) if !retried && approvals::is_pending_conflict(&err) => {
                warn!(
                    gym_id = caller.gym_id,
                    source_plan_id = ?submission.source_plan_id,
                    "concurrent submit for the same source plan, retrying"
                );
                retried = true;
            }
            Err(err) => return Err(err.into()),
        }
    };

    info!(
        approval_id = %submitted.approval.id,
        request_id = %submitted.request.id,
        source_plan_id = submitted.request.source_plan_id,
        superseded = submitted.superseded.len(),
        "plan submitted"
    );

    for old in &submitted.superseded {
        ctx.notifier.emit(
            PlanEvent::new(EventKind::StatusChanged, EventEntity::Approval, old.id, old.gym_id)
                .for_user(Some(old.user_id))
                .with_status(ApprovalStatus::Superseded),
        );
    }
    let approval = &submitted.approval;
    ctx.notifier.emit(
        PlanEvent::new(EventKind::Created, EventEntity::Approval, approval.id, approval.gym_id)
            .for_user(Some(approval.user_id))
            .with_status(ApprovalStatus::Pending),
    );

    Ok(submitted)
}

async fn insert_pending(
    pool: &PgPool,
    caller: &Caller,
    submission: &PlanSubmission,
    validated: &ValidatedSubmission,
    raw_items: &Value,
    all_items: &Value,
) -> anyhow::Result<Submitted> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin submit transaction")?;

    let request = plan_requests::insert_plan_request(
        &mut *tx,
        &NewPlanRequest {
            gym_id: caller.gym_id,
            user_id: submission.user_id,
            submitted_by: caller.user_id,
            submitter_role: caller.role,
            source: submission.source,
            kind: submission.kind,
            category: &validated.category,
            start_date: validated.start_date,
            end_date: validated.end_date,
            items: raw_items,
            source_plan_id: submission.source_plan_id,
        },
    )
    .await?;

    let note = format!(
        "superseded by plan request {} at {}",
        request.id,
        request.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let superseded =
        approvals::supersede_pending(
        &mut *tx,
        caller.gym_id,
        submission.user_id,
        request.source_plan_id,
        &note,
    )
    .await?;
    for old in &superseded {
        plan_requests::set_approval_status(
            &mut *tx,
            old.plan_request_id,
            ApprovalStatus::Superseded,
            None,
            None,
        )
        .await?;
    }

    let approval = approvals::insert_approval(
        &mut *tx,
        &NewApproval {
            plan_request_id: request.id,
            gym_id: caller.gym_id,
            user_id: submission.user_id,
            source_plan_id: request.source_plan_id,
            source: submission.source,
            kind: submission.kind,
            category: &validated.category,
            start_date: validated.start_date,
            end_date: validated.end_date,
            all_items,
        },
    )
    .await?;

    tx.commit().await.context("failed to commit submit")?;

    Ok(Submitted {
        request,
        approval,
        superseded,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn submission() -> PlanSubmission {
        serde_json::from_value(json!({
            "user_id": 7,
            "source": "manual",
            "category": "strength",
            "start_date": "2025-01-08",
            "end_date": "2025-01-10",
            "items": [{"name": "Push-ups"}, {"workout_name": "Squats"}],
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_with_defaults() {
        let s = submission();
        assert_eq!(s.kind, PlanKind::Workout);
        assert_eq!(s.source_plan_id, None);
        assert_eq!(s.items.len(), 2);
    }

    #[test]
    fn validate_normalizes_items() {
        let v = submission().validate().unwrap();
        assert_eq!(v.category, "strength");
        assert_eq!(v.items[1].name, "Squats");
    }

    #[test]
    fn validate_rejects_blank_category() {
        let mut s = submission();
        s.category = "  ".into();
        assert!(matches!(s.validate(), Err(PlanError::Validation(_))));
    }

    #[test]
    fn validate_requires_dates() {
        let mut s = submission();
        s.end_date = None;
        let err = s.validate().unwrap_err();
        assert_eq!(err.to_string(), "validation failed: end_date is required");
    }

    #[test]
    fn validate_rejects_reversed_range() {
        let mut s = submission();
        s.start_date = NaiveDate::from_ymd_opt(2025, 2, 1);
        assert!(matches!(s.validate(), Err(PlanError::InvalidRange { .. })));
    }

    #[test]
    fn validate_allows_empty_items() {
        let mut s = submission();
        s.items.clear();
        assert!(s.validate().unwrap().items.is_empty());
    }

    #[test]
    fn validate_rejects_bad_items() {
        let mut s = submission();
        s.items.push(json!({"sets": 3}));
        assert!(matches!(s.validate(), Err(PlanError::Validation(_))));
    }
}
