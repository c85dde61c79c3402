//! Plan request commands: submit, approve, reject, show, stats, preview.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use uuid::Uuid;

use gymplan_core::approval::{self, PlanSubmission};
use gymplan_core::distribution::DistributedPlan;
use gymplan_core::materialize::stats::PlanStats;
use gymplan_core::views::{self, PreviewRequest};
use gymplan_core::{Caller, PlanContext, materialize};
use gymplan_db::models::{ApprovalStatus, PlanType};

fn read_json<T: DeserializeOwned>(file: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", file.display()))
}

fn parse_id(kind: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid {kind} ID: {raw}"))
}

fn print_plan(plan: &DistributedPlan) {
    println!(
        "Schedule: {} .. {} ({} days, {} items, {:?})",
        plan.start_date, plan.end_date, plan.total_days, plan.total_items, plan.mode
    );
    if plan.clamped_items > 0 {
        println!("  {} dated item(s) clamped into the window", plan.clamped_items);
    }
    for day in &plan.days {
        let names: Vec<&str> = day.items.iter().map(|i| i.name.as_str()).collect();
        println!(
            "  day {:>3}  {}  {}",
            day.day_number,
            day.date,
            if names.is_empty() { "-".to_owned() } else { names.join(", ") }
        );
    }
    println!(
        "Totals: minutes={} calories={}",
        plan.total_minutes, plan.total_calories
    );
}

/// `gymplan submit <file>`: store a plan request as pending.
pub async fn run_submit(pool: &PgPool, ctx: &PlanContext, caller: &Caller, file: &Path) -> Result<()> {
    let submission: PlanSubmission = read_json(file)?;
    let submitted = approval::submit(pool, ctx, caller, &submission).await?;

    println!("Plan request {} submitted.", submitted.request.id);
    println!("  approval:       {}", submitted.approval.id);
    println!("  source_plan_id: {}", submitted.request.source_plan_id);
    for old in &submitted.superseded {
        println!("  superseded:     {}", old.id);
    }
    Ok(())
}

/// `gymplan approve <id>`.
pub async fn run_approve(pool: &PgPool, ctx: &PlanContext, caller: &Caller, id: &str) -> Result<()> {
    let id = parse_id("approval", id)?;
    let outcome = approval::approve(pool, ctx, caller, id).await?;

    println!("Approval {id} approved.");
    print_plan(&outcome.plan);
    if let Some(summary) = &outcome.materialized {
        println!("Materialized {} day row(s).", summary.days_written);
    }
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// `gymplan reject <id> [--reason ...]`.
pub async fn run_reject(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    id: &str,
    reason: Option<&str>,
) -> Result<()> {
    let id = parse_id("approval", id)?;
    approval::reject(pool, ctx, caller, id, reason).await?;
    println!("Approval {id} rejected.");
    Ok(())
}

/// `gymplan approvals [--status ...]`: the operator queue.
pub async fn run_list(pool: &PgPool, caller: &Caller, status: Option<ApprovalStatus>) -> Result<()> {
    let approvals = approval::list_approvals(pool, caller, status).await?;
    if approvals.is_empty() {
        println!("No approvals found.");
        return Ok(());
    }
    for a in &approvals {
        println!(
            "{}  {:<10} user={} source_plan_id={} {} .. {}  {}",
            a.id, a.status, a.user_id, a.source_plan_id, a.start_date, a.end_date, a.category
        );
    }
    Ok(())
}

/// `gymplan show <request-id>`.
pub async fn run_show(pool: &PgPool, caller: &Caller, id: &str) -> Result<()> {
    let id = parse_id("plan request", id)?;
    let view = views::request_view(pool, caller, id).await?;
    let request = &view.request;

    println!("Plan request: {} ({})", request.category, request.id);
    println!("User: {}  Source: {}  Kind: {}", request.user_id, request.source, request.kind);
    println!("Window: {} .. {}", request.start_date, request.end_date);
    println!("Status: {}", view.status);
    if let Some(approved_at) = request.approved_at {
        println!("Decided: {}", approved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(approval) = &view.approval {
        if !approval.notes.is_empty() {
            println!("Notes:");
            for line in approval.notes.lines() {
                println!("  {line}");
            }
        }
    }
    if let Some(plan) = &view.distributed_plan {
        println!();
        print_plan(plan);
    }
    if !view.daily_plans.is_empty() {
        println!();
        println!("Daily plans:");
        for day in &view.daily_plans {
            println!(
                "  [{}] day {} {}",
                if day.completed { "+" } else { "." },
                day.day_number.unwrap_or_default(),
                day.plan_date.map(|d| d.to_string()).unwrap_or_default(),
            );
        }
    }
    Ok(())
}

/// `gymplan stats <user> <plan-type> [--recompute]`.
pub async fn run_stats(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    user_id: i64,
    plan_type: PlanType,
    recompute: bool,
) -> Result<()> {
    let stats: PlanStats = if recompute {
        caller.require_staff("recompute stats")?;
        materialize::recompute_stats(pool, user_id, caller.gym_id, plan_type, &ctx.stats).await?
    } else {
        let row = views::stats_for(pool, caller, user_id, plan_type).await?;
        serde_json::from_value(row.stats).context("stored stats record is unreadable")?
    };

    println!("Stats for user {user_id} ({plan_type}):");
    println!("  days: {}  items: {}  workouts: {}", stats.total_days, stats.total_items, stats.total_workouts);
    println!("  minutes: {}  calories: {}", stats.total_minutes, stats.total_calories);
    println!(
        "  completed: {} day(s), {} item(s)  longest streak: {}",
        stats.completed_days, stats.completed_items, stats.longest_streak
    );
    println!(
        "  last 7 days: {}%  last 30 days: {}%",
        stats.weekly_progress.percent, stats.monthly_progress.percent
    );
    if !stats.recent_items.is_empty() {
        println!("  recent: {}", stats.recent_items.join(", "));
    }
    Ok(())
}

/// `gymplan complete <daily-plan-id> [--undo]`.
pub async fn run_complete(
    pool: &PgPool,
    ctx: &PlanContext,
    caller: &Caller,
    id: &str,
    completed: bool,
) -> Result<()> {
    let id = parse_id("daily plan", id)?;
    let done = materialize::mark_day_complete(pool, ctx, caller, id, completed).await?;
    println!(
        "Daily plan {id} marked {}.",
        if done.day.completed { "complete" } else { "incomplete" }
    );
    if let Some(warning) = done.warning {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// `gymplan preview <file>`: distribute without touching the database.
pub fn run_preview(file: &Path, json: bool) -> Result<()> {
    let request: PreviewRequest = read_json(file)?;
    let plan = views::preview(&request)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}
