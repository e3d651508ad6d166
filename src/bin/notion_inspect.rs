use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use wiki_sync::config;
use wiki_sync::notion::NotionClient;

#[derive(Parser, Debug)]
#[command(about = "Print a Notion database's properties and how the sync reads them")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Database ID to inspect (defaults to `notion.database_id`)
    #[arg(long)]
    db_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let client = NotionClient::from_config(&cfg)?;
    let db_id = args.db_id.unwrap_or_else(|| cfg.notion.database_id.clone());
    let fields = cfg.field_names();

    let db = client.retrieve_database(&db_id).await?;
    println!("Database ID: {}", db.id);
    println!("Properties:");
    let mut props: Vec<_> = db.properties.into_iter().collect();
    props.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, prop) in props {
        let role = if prop.typ == "title" {
            " [title]"
        } else if fields.category.contains(&name) {
            " [category]"
        } else if fields.authors.contains(&name) {
            " [authors]"
        } else if fields.status.contains(&name) {
            " [status]"
        } else {
            ""
        };
        println!("  {} -> {{ id: {}, type: {} }}{}", name, prop.id, prop.typ, role);
    }
    Ok(())
}
