// ABOUTME: CLI entry point for precise-timestamp-migrator
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Args, Parser, Subcommand};
use precise_timestamp_migrator::commands;
use precise_timestamp_migrator::config::{CliOverrides, MigrateConfig};
use precise_timestamp_migrator::convert::Direction;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "precise-timestamp-migrator")]
#[command(
    about = "Convert alarm timestamp columns between DATETIME and a microsecond-precise type",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct MigrateArgs {
    /// Database URL (mysql://, postgresql://, sqlite://PATH or sqlite::memory:)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
    /// Rows read and written per page
    #[arg(long)]
    page_size: Option<u64>,
    /// Finish conversions an earlier run left half done
    #[arg(long)]
    resume: bool,
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the columns from DATETIME to the precise timestamp type
    Upgrade(MigrateArgs),
    /// Convert the columns back from the precise timestamp type to DATETIME
    Downgrade(MigrateArgs),
    /// Show the conversion state of each column
    Status {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_migrate(direction: Direction, args: MigrateArgs) -> anyhow::Result<()> {
    let config = MigrateConfig::resolve(
        args.config.as_deref(),
        CliOverrides {
            database_url: args.database_url,
            page_size: args.page_size,
            resume: args.resume,
        },
    )?;
    commands::migrate(direction, &config, args.yes).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Upgrade(args) => run_migrate(Direction::Upgrade, args).await,
        Commands::Downgrade(args) => run_migrate(Direction::Downgrade, args).await,
        Commands::Status { database_url, json } => commands::status(&database_url, json).await,
    }
}
