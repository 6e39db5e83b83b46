use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use mysqlpool::{MySql, Options};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// M-MIMALLOC-APP: Use mimalloc as global allocator for improved performance.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Manage a MySQL schema using the connection string in DATABASE_URL.
#[derive(Debug, Parser)]
#[command(name = "mysqlpool", version)]
struct Cli {
    /// Directory holding the migration files.
    #[arg(long, env = "DATABASE_MIGRATION_PATH")]
    migrations: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate up or down to VERSION (0 reverts everything).
    Migrate { version: u64 },
    /// Check that the database accepts queries.
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mysqlpool=info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();

    let mut options = Options::from_env();
    if let Some(path) = cli.migrations {
        options = options.migration_path(path);
    }

    let mysql = MySql::from_environment(options)
        .await
        .context("Failed to connect to database")?;

    let outcome = match cli.command {
        Command::Migrate { version } => mysql
            .migrate(version)
            .await
            .with_context(|| format!("Failed to migrate to version {version}")),
        Command::Ping => mysql.ping().await.context("Database ping failed"),
    };

    mysql.close().await;
    outcome?;

    tracing::info!("Done");
    Ok(())
}
