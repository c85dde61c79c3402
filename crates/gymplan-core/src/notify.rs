//! Fire-and-forget plan change notifications.
//!
//! Delivery is never awaited and never fails the operation that emitted the
//! event; sinks log their own errors.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use gymplan_db::models::ApprovalStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Created,
    Updated,
    StatusChanged,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventEntity {
    Approval,
    AssignedPlan,
    DailyPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEvent {
    pub kind: EventKind,
    pub entity: EventEntity,
    pub id: Uuid,
    pub gym_id: i64,
    pub user_id: Option<i64>,
    pub status: Option<ApprovalStatus>,
}

impl PlanEvent {
    pub fn new(kind: EventKind, entity: EventEntity, id: Uuid, gym_id: i64) -> Self {
        Self {
            kind,
            entity,
            id,
            gym_id,
            user_id: None,
            status: None,
        }
    }

    pub fn for_user(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_status(mut self, status: ApprovalStatus) -> Self {
        self.status = Some(status);
        self
    }
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: PlanEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn emit(&self, _event: PlanEvent) {}
}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, event: PlanEvent) {
        info!(
            kind = ?event.kind,
            entity = ?event.entity,
            id = %event.id,
            gym_id = event.gym_id,
            user_id = ?event.user_id,
            status = ?event.status,
            "plan event"
        );
    }
}

/// Forwards events to an unbounded channel, e.g. a realtime push task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PlanEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, event: PlanEvent) {
        if let Err(err) = self.tx.send(event) {
            warn!(id = %err.0.id, "notification receiver dropped, event discarded");
        }
    }
}
