use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use wiki_sync::config;
use wiki_sync::db;
use wiki_sync::notion::NotionClient;
use wiki_sync::sync::{self, SyncOptions, SyncSettings};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sync the configured Notion database into the local store once and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only sync pages whose status matches `notion.fields.published_value`
    #[arg(long)]
    published_only: bool,

    /// Documents requested per listing call (max 100)
    #[arg(long, default_value = "10")]
    page_size: u32,

    /// Stop after this many documents
    #[arg(long)]
    max_pages: Option<usize>,

    /// Resume listing from a cursor returned by a previous capped run
    #[arg(long)]
    start_cursor: Option<String>,

    /// Log per-page progress at debug level instead of info
    #[arg(long)]
    quiet: bool,

    /// Delete stored pages the source no longer lists
    #[arg(long)]
    prune_missing: bool,
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
    let settings = SyncSettings::from_config(&cfg);
    let opts = SyncOptions {
        published_only: args.published_only,
        page_size: args.page_size,
        max_pages: args.max_pages,
        start_cursor: args.start_cursor,
        debug_log: !args.quiet,
        prune_missing: args.prune_missing,
    };

    info!(database_id = %settings.database_id, "Starting Notion sync");
    let report = sync::run_sync(&pool, &client, &settings, &opts).await?;

    if let Some(errors) = &report.errors {
        for e in errors {
            warn!(id = %e.id, kind = ?e.kind, error = %e.error, "sync error");
        }
    }
    info!(
        pages = report.pages_count,
        blocks = report.blocks_count,
        fetched = report.total_pages_fetched,
        pruned = report.pruned_pages,
        "Notion sync finished"
    );
    if report.has_more_pages {
        if let Some(cursor) = &report.next_cursor {
            info!(next_cursor = %cursor, "more pages remain; rerun with --start-cursor");
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
