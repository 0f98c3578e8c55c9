mod check;
mod quota;
mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "viralwatch-cli")]
#[command(about = "viralwatch command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Push captured JSON Lines payloads through the pipeline
    Replay {
        /// File with one `{platform, payload, outcome}` object per line
        file: PathBuf,
        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Do not record a collection run even when a database is configured
        #[arg(long)]
        no_record: bool,
    },
    /// Show per-credential budgets built from the watchlist
    Quota {
        /// Restrict output to one source (video, marketplace, short_video)
        #[arg(long)]
        source: Option<String>,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Database administration commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Load the environment and watchlist and print a summary
    Check,
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Verify the database is reachable
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = viralwatch_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Replay {
            file,
            json,
            no_record,
        }) => replay::run_replay(&config, &file, json, !no_record).await?,
        Some(Commands::Quota { source }) => quota::run_quota(&config, source.as_deref())?,
        Some(Commands::Config {
            command: ConfigCommands::Check,
        }) => check::run_config_check(&config)?,
        Some(Commands::Db {
            command: DbCommands::Ping,
        }) => {
            let pool = viralwatch_db::connect_pool_from_config(&config).await?;
            viralwatch_db::ping(&pool).await?;
            println!("database reachable");
        }
        Some(Commands::Db {
            command: DbCommands::Migrate,
        }) => {
            let pool = viralwatch_db::connect_pool_from_config(&config).await?;
            let applied = viralwatch_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        None => println!("viralwatch-cli: pass --help for the list of commands"),
    }

    Ok(())
}
