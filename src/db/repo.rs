use super::model::{BlockRow, CategoryCount, PageRow};
use crate::model::{RunStatus, SyncRun};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    // WAL lets the status endpoint read while a sync writes.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and ensure the parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- sync runs ----

#[instrument(skip_all)]
pub async fn insert_run(pool: &Pool, id: &str, started_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_runs (id, started_at, status, pages_count, blocks_count) VALUES (?, ?, ?, 0, 0)",
    )
    .bind(id)
    .bind(started_at)
    .bind(RunStatus::Running.as_str())
    .execute(pool)
    .await
    .context("failed to insert sync run")?;
    Ok(())
}

/// Moves a running run to a terminal status. A run that already left
/// `running` is left untouched and reported as an error.
#[instrument(skip_all, fields(run_id = id, status = status.as_str()))]
pub async fn finish_run(
    pool: &Pool,
    id: &str,
    status: RunStatus,
    pages_count: i64,
    blocks_count: i64,
    errors: Option<&str>,
) -> Result<()> {
    if !status.is_terminal() {
        return Err(anyhow!("cannot finish run {} as {}", id, status.as_str()));
    }
    let res = sqlx::query(
        "UPDATE sync_runs SET status = ?, finished_at = ?, pages_count = ?, blocks_count = ?, errors = ? \
         WHERE id = ? AND status = 'running'",
    )
    .bind(status.as_str())
    .bind(Utc::now())
    .bind(pages_count)
    .bind(blocks_count)
    .bind(errors)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to finalize sync run")?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("sync run {} is not running", id));
    }
    Ok(())
}

fn run_from_row(row: &SqliteRow) -> Result<SyncRun> {
    let status: String = row.get("status");
    let status = RunStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("sync run has unknown status {}", status))?;
    Ok(SyncRun {
        id: row.get("id"),
        started_at: row.get("started_at"),
        finished_at: row
            .try_get::<Option<DateTime<Utc>>, _>("finished_at")
            .ok()
            .flatten(),
        status,
        pages_count: row.get("pages_count"),
        blocks_count: row.get("blocks_count"),
        errors: row.try_get::<Option<String>, _>("errors").ok().flatten(),
    })
}

#[instrument(skip_all)]
pub async fn get_run(pool: &Pool, id: &str) -> Result<Option<SyncRun>> {
    let row = sqlx::query(
        "SELECT id, started_at, finished_at, status, pages_count, blocks_count, errors FROM sync_runs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(run_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn latest_run(pool: &Pool) -> Result<Option<SyncRun>> {
    let row = sqlx::query(
        "SELECT id, started_at, finished_at, status, pages_count, blocks_count, errors FROM sync_runs \
         ORDER BY started_at DESC, rowid DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(run_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn count_runs(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_runs")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ---- leases ----

/// Takes the lease for `collection_id` unless another holder owns a live one.
/// Returns whether the lease was acquired.
#[instrument(skip_all, fields(collection_id = %collection_id, holder = %holder))]
pub async fn acquire_lease(
    pool: &Pool,
    collection_id: &str,
    holder: &str,
    now: DateTime<Utc>,
    ttl_seconds: i64,
) -> Result<bool> {
    let now_secs = now.timestamp();
    let res = sqlx::query(
        "INSERT INTO sync_leases (collection_id, holder, acquired_at, expires_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(collection_id) DO UPDATE SET \
            holder = excluded.holder, acquired_at = excluded.acquired_at, expires_at = excluded.expires_at \
         WHERE sync_leases.expires_at <= excluded.acquired_at",
    )
    .bind(collection_id)
    .bind(holder)
    .bind(now_secs)
    .bind(now_secs + ttl_seconds)
    .execute(pool)
    .await
    .context("failed to acquire sync lease")?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all, fields(collection_id = %collection_id, holder = %holder))]
pub async fn release_lease(pool: &Pool, collection_id: &str, holder: &str) -> Result<()> {
    sqlx::query("DELETE FROM sync_leases WHERE collection_id = ? AND holder = ?")
        .bind(collection_id)
        .bind(holder)
        .execute(pool)
        .await
        .context("failed to release sync lease")?;
    Ok(())
}

// ---- pages ----

/// Insert or fully overwrite a page row keyed by its id.
#[instrument(skip_all, fields(page_id = %page.id))]
pub async fn upsert_page(pool: &Pool, page: &PageRow) -> Result<()> {
    let authors = page
        .authors
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        "INSERT INTO pages (id, title, category, authors, status, url, properties, raw, created_time, last_edited_time, last_synced_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
            title = excluded.title, category = excluded.category, authors = excluded.authors, \
            status = excluded.status, url = excluded.url, properties = excluded.properties, \
            raw = excluded.raw, created_time = excluded.created_time, \
            last_edited_time = excluded.last_edited_time, last_synced_at = excluded.last_synced_at",
    )
    .bind(&page.id)
    .bind(&page.title)
    .bind(&page.category)
    .bind(authors)
    .bind(&page.status)
    .bind(&page.url)
    .bind(page.properties.to_string())
    .bind(page.raw.to_string())
    .bind(page.created_time)
    .bind(page.last_edited_time)
    .bind(page.last_synced_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert page {}", page.id))?;
    Ok(())
}

fn optional_time(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    row.try_get::<Option<DateTime<Utc>>, _>(column).ok().flatten()
}

fn json_column(row: &SqliteRow, column: &str) -> Result<serde_json::Value> {
    let text: String = row.get(column);
    serde_json::from_str(&text).with_context(|| format!("column {} holds invalid JSON", column))
}

#[instrument(skip_all)]
pub async fn get_page(pool: &Pool, id: &str) -> Result<Option<PageRow>> {
    let row = sqlx::query(
        "SELECT id, title, category, authors, status, url, properties, raw, created_time, last_edited_time, last_synced_at \
         FROM pages WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let authors = row
        .try_get::<Option<String>, _>("authors")
        .ok()
        .flatten()
        .map(|text| serde_json::from_str::<Vec<String>>(&text))
        .transpose()
        .context("page authors hold invalid JSON")?;

    Ok(Some(PageRow {
        id: row.get("id"),
        title: row.get("title"),
        category: row.get("category"),
        authors,
        status: row.try_get::<Option<String>, _>("status").ok().flatten(),
        url: row.get("url"),
        properties: json_column(&row, "properties")?,
        raw: json_column(&row, "raw")?,
        created_time: optional_time(&row, "created_time"),
        last_edited_time: optional_time(&row, "last_edited_time"),
        last_synced_at: row.get("last_synced_at"),
    }))
}

#[instrument(skip_all)]
pub async fn list_page_ids(pool: &Pool) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM pages ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Removes a page; its blocks go with it through the foreign key cascade.
#[instrument(skip_all, fields(page_id = id))]
pub async fn delete_page(pool: &Pool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM pages WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete page {}", id))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pages(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn category_counts(pool: &Pool) -> Result<Vec<CategoryCount>> {
    let rows = sqlx::query(
        "SELECT category, COUNT(*) AS cnt FROM pages GROUP BY category ORDER BY cnt DESC, category ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| CategoryCount {
            category: row.get("category"),
            count: row.get("cnt"),
        })
        .collect())
}

// ---- blocks ----

#[instrument(skip_all, fields(page_id = %page_id))]
pub async fn delete_blocks_tx(tx: &mut Transaction<'_, Sqlite>, page_id: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM blocks WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to delete blocks of page {}", page_id))?;
    Ok(res.rows_affected())
}

#[instrument(skip_all, fields(page_id = %block.page_id, block_id = %block.id))]
pub async fn insert_block_tx(tx: &mut Transaction<'_, Sqlite>, block: &BlockRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO blocks (id, page_id, block_type, content, has_children, sort_index, created_time, last_edited_time, last_synced_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&block.id)
    .bind(&block.page_id)
    .bind(&block.block_type)
    .bind(block.content.to_string())
    .bind(block.has_children)
    .bind(block.sort_index)
    .bind(block.created_time)
    .bind(block.last_edited_time)
    .bind(block.last_synced_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to insert block {}", block.id))?;
    Ok(())
}

/// True for unique, foreign key and check violations. These reject a single
/// row and leave the enclosing transaction open.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => {
            db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation()
        }
        _ => false,
    }
}

/// Blocks of a page in display order.
#[instrument(skip_all)]
pub async fn list_blocks(pool: &Pool, page_id: &str) -> Result<Vec<BlockRow>> {
    let rows = sqlx::query(
        "SELECT id, page_id, block_type, content, has_children, sort_index, created_time, last_edited_time, last_synced_at \
         FROM blocks WHERE page_id = ? ORDER BY sort_index ASC",
    )
    .bind(page_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<BlockRow> {
            Ok(BlockRow {
                id: row.get("id"),
                page_id: row.get("page_id"),
                block_type: row.get("block_type"),
                content: json_column(row, "content")?,
                has_children: row.get("has_children"),
                sort_index: row.get("sort_index"),
                created_time: optional_time(row, "created_time"),
                last_edited_time: optional_time(row, "last_edited_time"),
                last_synced_at: row.get("last_synced_at"),
            })
        })
        .collect()
}
