mod config;
mod request_cmds;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use gymplan_core::notify::TracingSink;
use gymplan_core::{Caller, PlanContext};
use gymplan_db::models::{ApprovalStatus, PlanType, SubmitterRole};
use gymplan_db::pool;

use config::GymplanConfig;

#[derive(Parser)]
#[command(name = "gymplan", about = "Workout and meal plan approval for gyms")]
struct Cli {
    /// Database URL (overrides GYMPLAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(flatten)]
    caller: CallerArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Identity the command acts as. Defaults to a gym admin.
#[derive(Args)]
struct CallerArgs {
    /// Gym (tenant) to act in
    #[arg(long, global = true, default_value_t = 1)]
    gym_id: i64,
    /// User id to act as
    #[arg(long, global = true, default_value_t = 0)]
    user_id: i64,
    /// Role to act as: trainer, admin or member
    #[arg(long, global = true, default_value = "admin")]
    role: SubmitterRole,
}

impl CallerArgs {
    fn caller(&self) -> Caller {
        Caller::new(self.user_id, self.gym_id, self.role)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a gymplan config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/gymplan")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database if needed and run migrations
    DbInit,
    /// Serve the HTTP API
    Serve {
        /// Address to bind (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Submit a plan request from a JSON file
    Submit {
        /// Path to the submission JSON
        file: PathBuf,
    },
    /// List approval records
    Approvals {
        /// Only show records in this status
        #[arg(long)]
        status: Option<ApprovalStatus>,
    },
    /// Approve a pending plan: distribute and materialize it
    Approve {
        /// Approval ID
        id: String,
    },
    /// Reject a pending plan
    Reject {
        /// Approval ID
        id: String,
        /// Reason appended to the approval notes
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show a plan request with its schedule and daily plans
    Show {
        /// Plan request ID
        id: String,
    },
    /// Show a user's stats record
    Stats {
        user_id: i64,
        /// manual, ai_generated or trainer_assigned
        plan_type: PlanType,
        /// Recompute from the day rows instead of reading the stored record
        #[arg(long)]
        recompute: bool,
    },
    /// Mark a daily plan complete
    Complete {
        /// Daily plan ID
        id: String,
        /// Clear the completion flag instead
        #[arg(long)]
        undo: bool,
    },
    /// Distribute items from a JSON file without storing anything
    Preview {
        /// Path to a JSON file with start_date, end_date and items
        file: PathBuf,
        /// Print the schedule as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute the `gymplan init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        server: config::ServerSection::default(),
        stats: config::StatsSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  server = {}:{}", cfg.server.bind, cfg.server.port);
    println!();
    println!("Next: run `gymplan db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `gymplan db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = GymplanConfig::resolve(cli_db_url)?;

    println!("Initializing gymplan database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("gymplan db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let caller = cli.caller.caller();

    // Commands that never open a pool.
    match &cli.command {
        Commands::Init { db_url, force } => return cmd_init(db_url, *force),
        Commands::DbInit => return cmd_db_init(cli.database_url.as_deref()).await,
        Commands::Preview { file, json } => return request_cmds::run_preview(file, *json),
        _ => {}
    }

    let resolved = GymplanConfig::resolve(cli.database_url.as_deref())?;
    let ctx = PlanContext::new(Arc::new(TracingSink)).with_stats(resolved.stats);
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let result = match cli.command {
        Commands::Serve { bind, port } => {
            let bind = bind.unwrap_or_else(|| resolved.server.bind.clone());
            let port = port.unwrap_or(resolved.server.port);
            let state = serve_cmd::AppState {
                pool: db_pool.clone(),
                ctx,
            };
            serve_cmd::run_serve(state, &bind, port).await
        }
        Commands::Submit { file } => {
            request_cmds::run_submit(&db_pool, &ctx, &caller, &file).await
        }
        Commands::Approvals { status } => request_cmds::run_list(&db_pool, &caller, status).await,
        Commands::Approve { id } => request_cmds::run_approve(&db_pool, &ctx, &caller, &id).await,
        Commands::Reject { id, reason } => {
            request_cmds::run_reject(&db_pool, &ctx, &caller, &id, reason.as_deref()).await
        }
        Commands::Show { id } => request_cmds::run_show(&db_pool, &caller, &id).await,
        Commands::Stats {
            user_id,
            plan_type,
            recompute,
        } => request_cmds::run_stats(&db_pool, &ctx, &caller, user_id, plan_type, recompute).await,
        Commands::Complete { id, undo } => {
            request_cmds::run_complete(&db_pool, &ctx, &caller, &id, !undo).await
        }
        Commands::Init { .. } | Commands::DbInit | Commands::Preview { .. } => Ok(()),
    };

    db_pool.close().await;
    result
}
