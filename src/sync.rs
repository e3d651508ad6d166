//! The Notion → SQLite synchronization pipeline.
//!
//! One invocation lists the configured database, upserts every page, and
//! replaces each page's blocks. Per-page and per-block failures are collected
//! and reported; only a listing failure aborts the run.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Config, StatusFilterType};
use crate::db::{self, BlockRow, PageRow, Pool};
use crate::model::{ErrorCollector, ErrorKind, RunStatus, SyncError};
use crate::normalize::{self, FieldNames};
use crate::notion::{self, NotionService, MAX_PAGE_SIZE};

const DEFAULT_PAGE_SIZE: u32 = 10;

/// Per-document progress goes to `info` when the caller asked for verbose
/// logging and to `debug` otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// Caller-supplied options for one run. Field names match the `POST /sync` body.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    pub published_only: bool,
    pub page_size: u32,
    /// Upper bound on documents processed in this run. `0` means no cap.
    pub max_pages: Option<usize>,
    pub start_cursor: Option<String>,
    pub debug_log: bool,
    /// Delete stored pages that a complete listing no longer returns.
    pub prune_missing: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            published_only: false,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: None,
            start_cursor: None,
            debug_log: true,
            prune_missing: false,
        }
    }
}

impl SyncOptions {
    fn effective_page_size(&self) -> u32 {
        match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }

    fn cap(&self) -> Option<usize> {
        self.max_pages.filter(|m| *m > 0)
    }
}

/// Collection-level settings that do not change between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub database_id: String,
    pub fields: FieldNames,
    pub status_property: String,
    pub published_value: String,
    pub status_type: StatusFilterType,
    pub lease_ttl_seconds: i64,
}

impl SyncSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let fields = cfg.field_names();
        let status_property = fields
            .status
            .first()
            .cloned()
            .unwrap_or_else(|| "Status".to_string());
        Self {
            database_id: cfg.notion.database_id.clone(),
            fields,
            status_property,
            published_value: cfg.notion.fields.published_value.clone(),
            status_type: cfg.notion.fields.status_type,
            lease_ttl_seconds: i64::try_from(cfg.app.lease_ttl_seconds).unwrap_or(i64::MAX),
        }
    }

    fn published_filter(&self) -> Value {
        notion::published_filter(&self.status_property, &self.published_value, self.status_type)
    }
}

/// Outcome of a run that reached a terminal, non-error status.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub pages_count: usize,
    pub blocks_count: usize,
    pub total_pages_fetched: usize,
    pub processed_pages: usize,
    pub pruned_pages: usize,
    pub has_more_pages: bool,
    pub next_cursor: Option<String>,
    pub errors: Option<Vec<SyncError>>,
}

impl SyncReport {
    pub fn status(&self) -> RunStatus {
        if self.errors.is_none() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a sync of collection {0} is already running")]
    AlreadyRunning(String),
    #[error("sync aborted: {0:#}")]
    Aborted(anyhow::Error),
}

#[derive(Debug, Default)]
struct Counters {
    pages: usize,
    blocks: usize,
}

/// Result of walking the database listing.
#[derive(Debug, Default)]
struct Listing {
    documents: Vec<Value>,
    has_more: bool,
    next_cursor: Option<String>,
}

/// Runs one full sync: lease, run record, listing, per-page replace, finalize.
#[instrument(skip_all, fields(database_id = %settings.database_id))]
pub async fn run_sync(
    pool: &Pool,
    source: &dyn NotionService,
    settings: &SyncSettings,
    opts: &SyncOptions,
) -> Result<SyncReport, PipelineError> {
    let holder = Uuid::new_v4().to_string();
    let acquired = db::acquire_lease(
        pool,
        &settings.database_id,
        &holder,
        Utc::now(),
        settings.lease_ttl_seconds,
    )
    .await
    .map_err(PipelineError::Aborted)?;
    if !acquired {
        warn!("sync already in progress; rejecting");
        return Err(PipelineError::AlreadyRunning(settings.database_id.clone()));
    }

    let run_id = start_run(pool).await;
    let mut counters = Counters::default();
    let outcome = execute(pool, source, settings, opts, &mut counters).await;

    let result = match outcome {
        Ok(mut report) => {
            report.run_id = run_id.clone();
            if let Some(id) = &run_id {
                finish_run(pool, id, &report).await;
            }
            info!(
                pages = report.pages_count,
                blocks = report.blocks_count,
                errors = report.errors.as_ref().map_or(0, Vec::len),
                has_more = report.has_more_pages,
                "sync finished"
            );
            Ok(report)
        }
        Err(err) => {
            error!(?err, "sync aborted");
            if let Some(id) = &run_id {
                fail_run(pool, id, &err, &counters).await;
            }
            Err(PipelineError::Aborted(err))
        }
    };

    if let Err(err) = db::release_lease(pool, &settings.database_id, &holder).await {
        warn!(?err, "failed to release sync lease; it will expire on its own");
    }
    result
}

async fn start_run(pool: &Pool) -> Option<String> {
    let id = Uuid::new_v4().to_string();
    match db::insert_run(pool, &id, Utc::now()).await {
        Ok(()) => {
            info!(run_id = %id, "sync run started");
            Some(id)
        }
        Err(err) => {
            warn!(?err, "failed to record sync run; continuing without one");
            None
        }
    }
}

async fn finish_run(pool: &Pool, run_id: &str, report: &SyncReport) {
    let errors = report
        .errors
        .as_ref()
        .and_then(|errs| serde_json::to_string(errs).ok());
    if let Err(err) = db::finish_run(
        pool,
        run_id,
        report.status(),
        report.pages_count as i64,
        report.blocks_count as i64,
        errors.as_deref(),
    )
    .await
    {
        warn!(?err, run_id, "failed to finalize sync run");
    }
}

async fn fail_run(pool: &Pool, run_id: &str, cause: &anyhow::Error, counters: &Counters) {
    let message = format!("{:#}", cause);
    if let Err(err) = db::finish_run(
        pool,
        run_id,
        RunStatus::Error,
        counters.pages as i64,
        counters.blocks as i64,
        Some(&message),
    )
    .await
    {
        warn!(?err, run_id, "failed to mark sync run as errored");
    }
}

async fn execute(
    pool: &Pool,
    source: &dyn NotionService,
    settings: &SyncSettings,
    opts: &SyncOptions,
    counters: &mut Counters,
) -> Result<SyncReport> {
    let listing = list_documents(source, settings, opts).await?;
    info!(
        documents = listing.documents.len(),
        has_more = listing.has_more,
        "listing complete"
    );

    let mut errors = ErrorCollector::new();
    let mut processed = 0usize;
    for document in &listing.documents {
        processed += 1;
        let Some(page_id) = document.get("id").and_then(Value::as_str) else {
            errors.record(
                format!("#{}", processed - 1),
                ErrorKind::Page,
                &anyhow!("document has no id"),
            );
            continue;
        };
        progress!(opts.debug_log, page_id, position = processed, "processing page");
        if let Err(err) =
            process_document(pool, source, settings, page_id, document, &mut errors, counters, opts.debug_log)
                .await
        {
            warn!(?err, page_id, "page processing failed");
            errors.record(page_id, ErrorKind::PageProcess, &err);
        }
    }

    let complete_listing = !listing.has_more && opts.start_cursor.is_none();
    let pruned_pages = if opts.prune_missing && complete_listing {
        prune_missing(pool, &listing.documents, &mut errors).await?
    } else {
        0
    };

    Ok(SyncReport {
        success: true,
        run_id: None,
        pages_count: counters.pages,
        blocks_count: counters.blocks,
        total_pages_fetched: listing.documents.len(),
        processed_pages: processed,
        pruned_pages,
        has_more_pages: listing.has_more,
        next_cursor: listing.next_cursor,
        errors: (!errors.is_empty()).then(|| errors.into_vec()),
    })
}

/// Follows the database cursor until the source is exhausted or the
/// document cap is reached. Requests never ask for more than the cap
/// leaves room for, so the returned cursor resumes exactly after the last
/// document kept.
async fn list_documents(
    source: &dyn NotionService,
    settings: &SyncSettings,
    opts: &SyncOptions,
) -> Result<Listing> {
    let filter = opts.published_only.then(|| settings.published_filter());
    let page_size = opts.effective_page_size();
    let cap = opts.cap();

    let mut listing = Listing::default();
    let mut cursor = opts.start_cursor.clone().filter(|c| !c.is_empty());
    loop {
        let remaining = cap.map(|max| max.saturating_sub(listing.documents.len()));
        if remaining == Some(0) {
            break;
        }
        let size = remaining.map_or(page_size, |r| r.min(page_size as usize) as u32);

        let page = source
            .query_database(&settings.database_id, cursor.as_deref(), size, filter.as_ref())
            .await
            .context("failed to list documents")?;
        progress!(
            opts.debug_log,
            results = page.results.len(),
            has_more = page.has_more,
            "fetched listing page"
        );
        listing.documents.extend(page.results);
        listing.has_more = page.has_more;
        listing.next_cursor = page.next_cursor;

        if !listing.has_more {
            listing.next_cursor = None;
            break;
        }
        if listing.next_cursor.is_none() {
            warn!("listing reported more results without a cursor; stopping");
            listing.has_more = false;
            break;
        }
        cursor = listing.next_cursor.clone();
    }

    if let Some(max) = cap {
        listing.documents.truncate(max);
    }
    Ok(listing)
}

#[allow(clippy::too_many_arguments)]
async fn process_document(
    pool: &Pool,
    source: &dyn NotionService,
    settings: &SyncSettings,
    page_id: &str,
    document: &Value,
    errors: &mut ErrorCollector,
    counters: &mut Counters,
    verbose: bool,
) -> Result<()> {
    let now = Utc::now();
    let row = page_row(page_id, document, &settings.fields, now);
    if let Err(err) = db::upsert_page(pool, &row).await {
        warn!(?err, page_id, "failed to store page; skipping its blocks");
        errors.record(page_id, ErrorKind::Page, &err);
        return Ok(());
    }
    counters.pages += 1;

    let blocks = fetch_content_units(source, page_id)
        .await
        .context("failed to fetch blocks")?;
    let inserted = replace_blocks(pool, page_id, &blocks, errors, now).await?;
    counters.blocks += inserted;
    progress!(verbose, page_id, title = %row.title, blocks = inserted, "page synced");
    Ok(())
}

/// Immediate children of a page in display order. Nested children are not
/// followed; `has_children` on each block marks them.
pub async fn fetch_content_units(source: &dyn NotionService, page_id: &str) -> Result<Vec<Value>> {
    let mut blocks = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = source
            .list_block_children(page_id, cursor.as_deref(), MAX_PAGE_SIZE)
            .await?;
        blocks.extend(page.results);
        match page.next_cursor {
            Some(next) if page.has_more => cursor = Some(next),
            _ => break,
        }
    }
    Ok(blocks)
}

/// Deletes the page's stored blocks and inserts `blocks` in order, all in
/// one transaction. Stored blocks get consecutive sort indices, so a skipped
/// block does not leave a gap. A block the store rejects on a constraint is
/// recorded and skipped; any other insert failure abandons the whole
/// replacement. Returns how many blocks were stored.
async fn replace_blocks(
    pool: &Pool,
    page_id: &str,
    blocks: &[Value],
    errors: &mut ErrorCollector,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to open block transaction")?;

    if let Err(err) = db::delete_blocks_tx(&mut tx, page_id).await {
        warn!(?err, page_id, "failed to delete previous blocks; inserting anyway");
    }

    let mut inserted = 0usize;
    for (position, block) in blocks.iter().enumerate() {
        let row = match block_row(page_id, inserted, block, now) {
            Ok(row) => row,
            Err(err) => {
                errors.record(format!("{}#{}", page_id, position), ErrorKind::Block, &err);
                continue;
            }
        };
        match db::insert_block_tx(&mut tx, &row).await {
            Ok(()) => inserted += 1,
            Err(err) if db::is_constraint_violation(&err) => {
                warn!(?err, page_id, block_id = %row.id, "block rejected by store");
                errors.record(&row.id, ErrorKind::Block, &err);
            }
            // Anything else may have ended the transaction; drop it so the
            // previous blocks stay.
            Err(err) => return Err(err),
        }
    }

    tx.commit()
        .await
        .context("failed to commit block replacement")?;
    Ok(inserted)
}

/// Removes stored pages absent from a complete listing. Returns the count removed.
async fn prune_missing(
    pool: &Pool,
    listed: &[Value],
    errors: &mut ErrorCollector,
) -> Result<usize> {
    let seen: HashSet<&str> = listed
        .iter()
        .filter_map(|doc| doc.get("id").and_then(Value::as_str))
        .collect();
    let stored = db::list_page_ids(pool)
        .await
        .context("failed to list stored pages")?;

    let mut pruned = 0usize;
    for id in stored.iter().filter(|id| !seen.contains(id.as_str())) {
        match db::delete_page(pool, id).await {
            Ok(()) => {
                info!(page_id = %id, "pruned page missing from source");
                pruned += 1;
            }
            Err(err) => errors.record(id.as_str(), ErrorKind::Page, &err),
        }
    }
    Ok(pruned)
}

fn parse_time(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn page_row(page_id: &str, document: &Value, fields: &FieldNames, now: DateTime<Utc>) -> PageRow {
    let normalized = normalize::normalize(document, fields);
    PageRow {
        id: page_id.to_string(),
        title: normalized.title,
        category: normalized.category,
        authors: normalized.authors,
        status: normalized.status,
        url: normalized.url,
        properties: document
            .get("properties")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        raw: document.clone(),
        created_time: parse_time(document, "created_time"),
        last_edited_time: parse_time(document, "last_edited_time"),
        last_synced_at: now,
    }
}

fn block_row(page_id: &str, sort_index: usize, block: &Value, now: DateTime<Utc>) -> Result<BlockRow> {
    let id = block
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("block has no id"))?;
    Ok(BlockRow {
        id: id.to_string(),
        page_id: page_id.to_string(),
        block_type: block
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unsupported")
            .to_string(),
        content: block.clone(),
        has_children: block
            .get("has_children")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        sort_index: sort_index as i64,
        created_time: parse_time(block, "created_time"),
        last_edited_time: parse_time(block, "last_edited_time"),
        last_synced_at: now,
    })
}
