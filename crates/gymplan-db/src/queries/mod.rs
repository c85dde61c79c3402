pub mod approvals;
pub mod assigned_plans;
pub mod daily_plans;
pub mod mobile_plans;
pub mod plan_requests;
