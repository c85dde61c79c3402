//! Plan distribution, approval and materialization for gyms.
//!
//! A submitted plan is a flat list of items plus a date range. Submitting
//! stores it as PENDING; approving distributes the items across the days
//! of the range, writes one row per day for the member and refreshes their
//! stats record. Web-authored plans are additionally mirrored into the
//! mobile tables.

pub mod approval;
pub mod assigned;
pub mod caller;
pub mod context;
pub mod distribution;
pub mod error;
pub mod item;
pub mod materialize;
pub mod mirror;
pub mod notify;
pub mod views;

pub use caller::Caller;
pub use context::PlanContext;
pub use error::PlanError;
