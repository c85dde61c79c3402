//! Approval state machine.
//!
//! ```text
//! pending -> approved
//! pending -> rejected
//! pending -> superseded   (a newer submission for the same source plan)
//! ```
//!
//! Every other edge is refused. Status writes are conditional on the row
//! still being `pending`, so concurrent deciders cannot both win.

pub mod submit;

use anyhow::{Context, anyhow, bail};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use gymplan_db::models::{ApprovalStatus, PlanApproval};
use gymplan_db::queries::approvals as db;
use gymplan_db::queries::plan_requests;

use crate::caller::Caller;
use crate::context::PlanContext;
use crate::distribution::{DistributedPlan, distribute};
use crate::error::PlanError;
use crate::item::{Item, normalize_item_list};
use crate::materialize::{MaterializeSummary, MaterializeTarget, materialize};
use crate::notify::{EventEntity, EventKind, PlanEvent};

pub use submit::{PlanSubmission, Submitted, ValidatedSubmission, submit};

pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    /// Statuses reachable from `from` in one step.
    pub fn targets(from: ApprovalStatus) -> &'static [ApprovalStatus] {
        match from {
            ApprovalStatus::Pending => &[
                ApprovalStatus::Approved,
                ApprovalStatus::Rejected,
                ApprovalStatus::Superseded,
            ],
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Superseded => {
                &[]
            }
        }
    }

    pub fn is_valid_transition(from: ApprovalStatus, to: ApprovalStatus) -> bool {
        Self::targets(from).contains(&to)
    }

    pub fn check(id: Uuid, from: ApprovalStatus, to: ApprovalStatus) -> Result<(), PlanError> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(PlanError::InvalidTransition { id, from, to })
        }
    }
}

/// An approval that reached APPROVED. `warnings` lists follow-up steps
/// that failed; the status change stands regardless.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub approval: PlanApproval,
    pub plan: DistributedPlan,
    pub materialized: Option<MaterializeSummary>,
    pub warnings: Vec<String>,
}

/// Items stored on an approval record, falling back to the legacy
/// `exercise_details` column when `all_items` is absent or empty.
pub fn stored_items(approval: &PlanApproval) -> Result<Vec<Item>, PlanError> {
    let has_items = |v: &&serde_json::Value| match v {
        serde_json::Value::Null => false,
        serde_json::Value::Array(a) => !a.is_empty(),
        _ => true,
    };
    let source = approval
        .all_items
        .as_ref()
        .filter(has_items)
        .or(approval.exercise_details.as_ref());

    match source {
        Some(value) => Ok(normalize_item_list(approval.kind, value)?),
        None => Ok(Vec::new()),
    }
}

/// Approve a PENDING record, materialize its schedule for the target user
/// and propagate the status onto the originating plan request.
pub async fn approve(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    approval_id: Uuid,
) -> Result<ApprovalOutcome, PlanError> {
    caller.require_staff("approve plans")?;

    let current = db::get_approval_in_gym(pool, caller.gym_id, approval_id)
        .await?
        .ok_or_else(|| PlanError::not_found("approval", approval_id))?;
    ApprovalStateMachine::check(approval_id, current.status, ApprovalStatus::Approved)?;

    let items = stored_items(&current)?;
    let plan = distribute(&items, current.start_date, current.end_date)?;
    let snapshot = serde_json::to_value(&plan).context("failed to encode distributed plan")?;

    let Some(approval) =
        db::approve_pending(pool, approval_id, caller.gym_id, caller.user_id, &snapshot).await?
    else {
        return Err(lost_transition(pool, caller.gym_id, approval_id, ApprovalStatus::Approved).await);
    };

    info!(
        approval_id = %approval.id,
        user_id = approval.user_id,
        decided_by = caller.user_id,
        total_days = plan.total_days,
        total_items = plan.total_items,
        "plan approved"
    );

    let mut warnings = Vec::new();

    let target = MaterializeTarget {
        user_id: approval.user_id,
        gym_id: approval.gym_id,
        plan_type: approval.source.plan_type(),
        source_plan_id: approval.source_plan_id,
        approval_id: Some(approval.id),
    };
    let materialized = match materialize(pool, &target, &plan, &ctx.stats).await {
        Ok(summary) => Some(summary),
        Err(err) => {
            error!(approval_id = %approval.id, error = %err, "materialization failed");
            warnings.push(err.to_string());
            None
        }
    };

    if let Err(err) = propagate(pool, &approval).await {
        error!(approval_id = %approval.id, error = %format!("{err:#}"), "status propagation failed");
        warnings.push(format!("{err:#}"));
    }

    record_warnings(pool, &approval, &warnings).await;
    emit_status(ctx, &approval);

    Ok(ApprovalOutcome {
        approval,
        plan,
        materialized,
        warnings,
    })
}

/// Reject a PENDING record. `reason` is appended to the audit notes.
pub async fn reject(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    approval_id: Uuid,
    reason: Option<&str>,
) -> Result<PlanApproval, PlanError> {
    caller.require_staff("reject plans")?;

    let current = db::get_approval_in_gym(pool, caller.gym_id, approval_id)
        .await?
        .ok_or_else(|| PlanError::not_found("approval", approval_id))?;
    ApprovalStateMachine::check(approval_id, current.status, ApprovalStatus::Rejected)?;

    let note = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| format!("rejected by {}: {r}", caller.user_id));

    let Some(approval) =
        db::reject_pending(pool, approval_id, caller.gym_id, caller.user_id, note.as_deref())
            .await?
    else {
        return Err(lost_transition(pool, caller.gym_id, approval_id, ApprovalStatus::Rejected).await);
    };

    info!(approval_id = %approval.id, decided_by = caller.user_id, "plan rejected");

    if let Err(err) = propagate(pool, &approval).await {
        error!(approval_id = %approval.id, error = %format!("{err:#}"), "status propagation failed");
    }
    emit_status(ctx, &approval);

    Ok(approval)
}

/// Approval records in the caller's gym, oldest first.
pub async fn list_approvals(
    pool: &PgPool,
    caller: &Caller,
    status: Option<ApprovalStatus>,
) -> Result<Vec<PlanApproval>, PlanError> {
    caller.require_staff("list approvals")?;
    Ok(db::list_approvals(pool, caller.gym_id, status).await?)
}

/// The conditional update matched nothing: report why.
async fn lost_transition(pool: &PgPool, gym_id: i64, id: Uuid, to: ApprovalStatus) -> PlanError {
    match db::get_approval_in_gym(pool, gym_id, id).await {
        Ok(None) => PlanError::not_found("approval", id),
        Ok(Some(row)) if row.status != ApprovalStatus::Pending => PlanError::InvalidTransition {
            id,
            from: row.status,
            to,
        },
        Ok(Some(_)) => PlanError::Database(anyhow!(
            "approval {id} changed concurrently; re-query before retrying"
        )),
        Err(err) => err.into(),
    }
}

/// Copy the decision onto the plan request row it came from.
async fn propagate(pool: &PgPool, approval: &PlanApproval) -> anyhow::Result<()> {
    let (approved_by, approved_at) = match approval.status {
        ApprovalStatus::Approved => (approval.decided_by, approval.decided_at),
        _ => (None, None),
    };
    let rows = plan_requests::set_approval_status(
        pool,
        approval.plan_request_id,
        approval.status,
        approved_by,
        approved_at,
    )
    .await?;
    if rows == 0 {
        bail!(
            "{} plan request {} not found",
            approval.source,
            approval.plan_request_id
        );
    }
    Ok(())
}

async fn record_warnings(pool: &PgPool, approval: &PlanApproval, warnings: &[String]) {
    for warning in warnings {
        let note = format!("warning: {warning}");
        if let Err(err) = db::append_note(pool, approval.id, &note).await {
            warn!(approval_id = %approval.id, error = %err, "failed to record approval warning");
        }
    }
}

fn emit_status(ctx: &PlanContext, approval: &PlanApproval) {
    ctx.notifier.emit(
        PlanEvent::new(
            EventKind::StatusChanged,
            EventEntity::Approval,
            approval.id,
            approval.gym_id,
        )
        .for_user(Some(approval.user_id))
        .with_status(approval.status),
    );
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use gymplan_db::models::{PlanKind, PlanSource};
    use serde_json::json;

    use super::*;

    #[test]
    fn pending_reaches_every_terminal_status() {
        for to in [
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Superseded,
        ] {
            assert!(ApprovalStateMachine::is_valid_transition(
                ApprovalStatus::Pending,
                to
            ));
        }
        assert!(!ApprovalStateMachine::is_valid_transition(
            ApprovalStatus::Pending,
            ApprovalStatus::Pending
        ));
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in ApprovalStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(ApprovalStateMachine::targets(from).is_empty());
            for to in ApprovalStatus::ALL {
                assert!(!ApprovalStateMachine::is_valid_transition(from, to));
            }
        }
    }

    #[test]
    fn check_reports_the_refused_edge() {
        let id = Uuid::new_v4();
        let err = ApprovalStateMachine::check(id, ApprovalStatus::Rejected, ApprovalStatus::Approved)
            .unwrap_err();
        match err {
            PlanError::InvalidTransition { id: got, from, to } => {
                assert_eq!(got, id);
                assert_eq!(from, ApprovalStatus::Rejected);
                assert_eq!(to, ApprovalStatus::Approved);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn approval(all_items: Option<serde_json::Value>, legacy: Option<serde_json::Value>) -> PlanApproval {
        PlanApproval {
            id: Uuid::new_v4(),
            plan_request_id: Uuid::new_v4(),
            gym_id: 1,
            user_id: 7,
            source_plan_id: 100_000,
            source: PlanSource::Manual,
            kind: PlanKind::Workout,
            category: "strength".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 8).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            status: ApprovalStatus::Pending,
            notes: String::new(),
            all_items,
            exercise_details: legacy,
            distributed_plan: None,
            decided_by: None,
            decided_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn stored_items_prefers_all_items() {
        let a = approval(
            Some(json!([{"name": "Squats"}])),
            Some(json!([{"name": "Legacy"}])),
        );
        let items = stored_items(&a).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Squats");
    }

    #[test]
    fn stored_items_falls_back_to_legacy_details() {
        let a = approval(Some(json!([])), Some(json!([{"exercise_name": "Legacy row"}])));
        assert_eq!(stored_items(&a).unwrap()[0].name, "Legacy row");

        let b = approval(None, Some(json!({"exercises": [{"name": "Wrapped"}]})));
        assert_eq!(stored_items(&b).unwrap()[0].name, "Wrapped");
    }

    #[test]
    fn stored_items_empty_when_nothing_recorded() {
        assert!(stored_items(&approval(None, None)).unwrap().is_empty());
    }
}
