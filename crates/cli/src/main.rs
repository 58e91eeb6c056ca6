//! Estoque CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! estoque migrate
//!
//! # Create an API user (password from --password or ESTOQUE_USER_PASSWORD)
//! estoque user create -u operator
//!
//! # Insert the sample products when missing
//! estoque seed
//!
//! # Dump the database and prune dumps older than 30 days
//! estoque backup --dir backups --retention-days 30
//! ```
//!
//! `backup` is meant to be invoked by the host scheduler, e.g. weekly from
//! cron: `0 3 * * 0 estoque backup`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "estoque")]
#[command(author, version, about = "Estoque CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage API users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Insert the sample products that are not present yet
    Seed,
    /// Dump the database with `pg_dump` and prune old dumps
    Backup {
        /// Directory the dumps are written to
        #[arg(short, long, default_value = "backups")]
        dir: PathBuf,

        /// Dumps older than this many days are deleted
        #[arg(short, long, default_value_t = commands::backup::DEFAULT_RETENTION_DAYS)]
        retention_days: u32,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user
    Create {
        /// Login name
        #[arg(short, long)]
        username: String,

        /// Password (min 8 characters)
        #[arg(short, long, env = "ESTOQUE_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Loaded before parsing so `.env` can supply env-backed arguments.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::User { action } => match action {
            UserAction::Create { username, password } => {
                commands::user::create_user(&username, &password).await?;
            }
        },
        Commands::Seed => commands::seed::sample_products().await?,
        Commands::Backup {
            dir,
            retention_days,
        } => {
            commands::backup::run(&dir, retention_days).await?;
        }
    }
    Ok(())
}
