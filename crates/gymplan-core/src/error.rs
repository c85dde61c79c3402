//! Caller-visible error taxonomy for plan operations.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use gymplan_db::models::ApprovalStatus;

use crate::distribution::DistributionError;
use crate::item::ItemError;

/// Errors returned by submit/approve/reject and the other plan operations.
///
/// Every variant except `Database` is raised before any state is written.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("approval {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    #[error("invalid date range: end {end} is before start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl PlanError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<ItemError> for PlanError {
    fn from(err: ItemError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<DistributionError> for PlanError {
    fn from(err: DistributionError) -> Self {
        match err {
            DistributionError::InvalidRange { start, end } => Self::InvalidRange { start, end },
            other => Self::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_range_error_keeps_dates() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        let err: PlanError = DistributionError::InvalidRange { start, end }.into();
        assert!(matches!(err, PlanError::InvalidRange { .. }));
        assert_eq!(
            err.to_string(),
            "invalid date range: end 2025-01-08 is before start 2025-01-10"
        );
    }

    #[test]
    fn item_errors_become_validation() {
        let err: PlanError = ItemError::NotAList.into();
        assert!(matches!(err, PlanError::Validation(_)));
    }

    #[test]
    fn not_found_message() {
        let err = PlanError::not_found("approval", 42);
        assert_eq!(err.to_string(), "approval 42 not found");
    }
}
