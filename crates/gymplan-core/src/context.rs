//! Per-process collaborators shared by plan operations: the notification
//! sink and stats options.

use std::fmt;
use std::sync::Arc;

use crate::materialize::stats::StatsOptions;
use crate::notify::{NotificationSink, TracingSink};

/// Shared collaborators handed to every plan operation alongside the pool.
#[derive(Clone)]
pub struct PlanContext {
    pub notifier: Arc<dyn NotificationSink>,
    pub stats: StatsOptions,
}

impl PlanContext {
    pub fn new(notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            notifier,
            stats: StatsOptions::default(),
        }
    }

    pub fn with_stats(mut self, stats: StatsOptions) -> Self {
        self.stats = stats;
        self
    }
}

impl Default for PlanContext {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for PlanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanContext")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
