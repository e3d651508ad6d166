use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use wiki_sync::config;
use wiki_sync::db;
use wiki_sync::notion::NotionClient;
use wiki_sync::server::{self, AppState};
use wiki_sync::sync::SyncSettings;

#[derive(Debug, Parser)]
#[command(author, version, about = "Serve the wiki sync trigger and status endpoints")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override `app.bind` from the config file
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let client = NotionClient::from_config(&cfg)?;
    let state = AppState {
        pool,
        source: Arc::new(client),
        settings: Arc::new(SyncSettings::from_config(&cfg)),
        sync_secret: Arc::from(cfg.app.sync_secret.as_str()),
    };

    let bind = args.bind.unwrap_or_else(|| cfg.app.bind.clone());
    server::run_server(&bind, state).await
}
