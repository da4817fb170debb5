//! conform-migrate CLI
//!
//! Command-line tool for lowering changelog documents and applying the
//! resulting SQLite table rebuilds.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use conform_migrate::engine::{EngineOptions, MigrationEngine};

/// SQLite-aware changelog lowering and table rebuilds.
#[derive(Parser)]
#[command(name = "conform-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Destination directory for emitted changelog artifacts.
    #[arg(short, long, default_value = "migrations/generated")]
    output_dir: PathBuf,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lower a changelog and apply the required table rebuilds.
    Apply {
        /// Changelog file to process.
        changelog: PathBuf,

        /// Do not auto-name anonymous foreign-key constraints.
        #[arg(long)]
        no_auto_name: bool,

        /// Emit an artifact even when no change sets remain.
        #[arg(long)]
        keep_empty: bool,
    },

    /// Show the lowered changelog and rebuild plan without executing.
    Lower {
        /// Changelog file to process.
        changelog: PathBuf,
    },

    /// Initialize the audit table.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Connect to database
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&cli.database)
        .await?;

    match cli.command {
        Commands::Init => {
            info!("Initializing the audit store...");
            MigrationEngine::with_defaults(pool).init().await?;
            info!("Audit table created successfully.");
        }

        Commands::Apply {
            changelog,
            no_auto_name,
            keep_empty,
        } => {
            let text = std::fs::read_to_string(&changelog)?;
            let options = EngineOptions {
                auto_name_constraints: !no_auto_name,
                skip_when_empty: !keep_empty,
                output_dir: cli.output_dir,
                dry_run: false,
            };
            let engine = MigrationEngine::new(pool, options);
            let outcome = engine.run(&text).await?;

            for table in &outcome.rebuilt_tables {
                info!(table = %table, "rebuilt");
            }
            if outcome.plan_already_applied {
                info!("Rebuild plan was already applied; nothing to do.");
            }
            match &outcome.artifact_path {
                Some(path) => info!("Lowered changelog written to {}", path.display()),
                None => info!("No changelog artifact produced."),
            }
            for pending in &outcome.pending_type_changes {
                info!(
                    table = %pending.table,
                    column = %pending.column,
                    new_type = %pending.new_type,
                    "pending type change (not applied)"
                );
            }
        }

        Commands::Lower { changelog } => {
            let text = std::fs::read_to_string(&changelog)?;
            let options = EngineOptions {
                output_dir: cli.output_dir,
                dry_run: true,
                ..EngineOptions::default()
            };
            let engine = MigrationEngine::new(pool, options);
            let outcome = engine.run(&text).await?;

            println!("{}", outcome.lowered);
            if let Some(plan) = &outcome.rebuild_plan {
                println!("\nRebuild plan:\n{plan}");
            }
            if !outcome.pending_type_changes.is_empty() {
                println!("\nPending type changes (not applied):");
                for pending in &outcome.pending_type_changes {
                    println!(
                        "  {}.{} -> {}",
                        pending.table, pending.column, pending.new_type
                    );
                }
            }
        }
    }

    Ok(())
}
