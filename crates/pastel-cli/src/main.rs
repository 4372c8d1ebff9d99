use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use pastel_cli::commands;
use pastel_cli::config::Cli;
use pastel_db::SqliteDatabase;
use pastel_service::LocalService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db = SqliteDatabase::open(&cli.db_config()).context("opening metadata database")?;
    let store_config = cli.store_config();
    debug!("attachments at {}", store_config.root.display());
    let store = pastel_store::create_store(&store_config).context("opening attachment store")?;
    let service = LocalService::new(db, store, cli.coordinator_config());

    let mut stdout = std::io::stdout().lock();
    commands::run(&cli, &service, &mut stdout).await
}
