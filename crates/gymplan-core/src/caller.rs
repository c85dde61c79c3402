//! Authenticated caller identity.
//!
//! Authentication itself happens upstream; by the time a request reaches
//! this crate the gym, user and role are trusted.

use gymplan_db::models::SubmitterRole;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: i64,
    pub gym_id: i64,
    pub role: SubmitterRole,
}

impl Caller {
    pub fn new(user_id: i64, gym_id: i64, role: SubmitterRole) -> Self {
        Self {
            user_id,
            gym_id,
            role,
        }
    }

    /// Trainers and admins decide approvals and author assigned plans.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, SubmitterRole::Trainer | SubmitterRole::Admin)
    }

    /// Staff may act on any member of their gym; members only on themselves.
    pub fn can_act_for(&self, user_id: i64) -> bool {
        self.is_staff() || self.user_id == user_id
    }

    pub fn require_staff(&self, action: &str) -> Result<(), PlanError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(PlanError::Forbidden(format!(
                "{} {} may not {action}",
                self.role, self.user_id
            )))
        }
    }

    pub fn require_access_to(&self, user_id: i64) -> Result<(), PlanError> {
        if self.can_act_for(user_id) {
            Ok(())
        } else {
            Err(PlanError::Forbidden(format!(
                "{} {} may not access user {user_id}",
                self.role, self.user_id
            )))
        }
    }
}
