//! PostgreSQL storage for plan requests, approvals, materialized daily
//! plans and the mobile mirror.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
