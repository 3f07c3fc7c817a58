//! oxide-ledger CLI
//!
//! Command-line tool for tracking and applying migration units.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use oxide_ledger::prelude::*;

/// Migration ledger for multi-datasource schema evolution.
#[derive(Parser)]
#[command(name = "oxide-ledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "OXIDE_LEDGER_CONFIG", default_value = "ledger.toml")]
    config: PathBuf,

    /// Migrations directory (overrides the configuration).
    #[arg(short, long)]
    migrations_dir: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the tracking table in every datasource.
    Init,

    /// Show discovered units and which ones are pending.
    Status,

    /// Apply pending units.
    Migrate,

    /// Revert one applied unit.
    Down {
        /// Unit to revert (latest applied if not specified).
        #[arg(short, long)]
        migration: Option<String>,
    },

    /// Generate an empty unit.
    Generate {
        /// Timestamp of the unit (current time if not specified).
        #[arg(short, long)]
        timestamp: Option<u64>,

        /// Print the unit without writing it (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the latest applied unit per datasource.
    Latest,
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

    let mut config = LedgerConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = cli.migrations_dir {
        config.migration_dir = dir;
    }

    let migrator = Migrator::from_config(&config);

    let outcome = run(cli.command, &config, &migrator).await;
    migrator.ledger().connections().close_all().await;
    outcome
}

async fn run(command: Commands, config: &LedgerConfig, migrator: &Migrator) -> anyhow::Result<()> {
    let ledger = migrator.ledger();

    match command {
        Commands::Init => {
            for datasource in config.datasources.keys() {
                ledger.ensure_table_exists(datasource).await?;
                info!(datasource = %datasource, table = %ledger.table(), "Ledger ready");
            }
        }

        Commands::Status => {
            let status = migrator.status().await?;

            if status.discovered.is_empty() {
                info!(dir = %migrator.migration_dir().display(), "No migration units found.");
            } else {
                println!("\nMigration units:");
                println!("{:-<60}", "");
                for name in &status.discovered {
                    let mark = if status.executed.contains(name) { "X" } else { " " };
                    println!(" [{}] {}", mark, name);
                }
                println!();
            }

            if status.pending.is_empty() {
                info!("All migration units are applied.");
            } else {
                info!(count = status.pending.len(), "Pending migration units");
            }
        }

        Commands::Migrate => {
            let report = migrator.migrate().await?;
            for failure in &report.failures {
                warn!("{}", failure);
            }
            let completed = report.into_result()?;
            info!(steps = completed.len(), "Migrate complete");
        }

        Commands::Down { migration } => {
            let report = match migration {
                Some(name) => Some(migrator.revert(&name).await?),
                None => migrator.revert_latest().await?,
            };
            if let Some(report) = report {
                let completed = report.into_result()?;
                info!(steps = completed.len(), "Rollback complete");
            }
        }

        Commands::Generate { timestamp, dry_run } => {
            let timestamp = match timestamp {
                Some(ts) => ts,
                None => u64::try_from(chrono::Utc::now().timestamp())?,
            };
            // Empty SQL for every datasource, to be filled in by hand.
            let payloads: SqlPayloads = config
                .datasources
                .keys()
                .map(|name| (name.clone(), String::new()))
                .collect();
            let author = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default();

            if dry_run {
                let body =
                    generate_unit_body(&config.naming, &payloads, &payloads, timestamp, &author)?;
                println!(
                    "Would create migration: {}",
                    migrator
                        .migration_dir()
                        .join(config.naming.file_name_for(timestamp))
                        .display()
                );
                println!("\n{}", body);
            } else {
                let path = write_unit(
                    migrator.migration_dir(),
                    &config.naming,
                    &payloads,
                    &payloads,
                    timestamp,
                    &author,
                )?;
                println!("{}", path.display());
            }
        }

        Commands::Latest => {
            for (datasource, latest) in ledger.latest_per_datasource().await? {
                println!("{}: {}", datasource, latest.as_deref().unwrap_or("-"));
            }
        }
    }

    Ok(())
}
