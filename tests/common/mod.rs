#![allow(dead_code)]

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use wiki_sync::config::StatusFilterType;
use wiki_sync::normalize::FieldNames;
use wiki_sync::notion::model::ListPage;
use wiki_sync::notion::NotionService;
use wiki_sync::sync::SyncSettings;

pub const DATABASE_ID: &str = "wiki-db";

/// Blocks are served this many per call so cursor following is exercised.
const CHILDREN_CHUNK: usize = 2;

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        database_id: DATABASE_ID.into(),
        fields: FieldNames {
            category: vec!["Category".into()],
            authors: vec!["Authors".into()],
            status: vec!["Status".into()],
        },
        status_property: "Status".into(),
        published_value: "Published".into(),
        status_type: StatusFilterType::Select,
        lease_ttl_seconds: 600,
    }
}

pub fn doc(id: &str, title: &str, category: &str) -> Value {
    json!({
        "object": "page",
        "id": id,
        "created_time": "2024-01-02T03:04:05.000Z",
        "last_edited_time": "2024-02-02T03:04:05.000Z",
        "properties": {
            "Name": { "id": "title", "type": "title", "title": [{ "plain_text": title }] },
            "Category": { "id": "cat", "type": "select", "select": { "name": category } }
        }
    })
}

pub fn block(id: &str, text: &str) -> Value {
    json!({
        "object": "block",
        "id": id,
        "type": "paragraph",
        "has_children": false,
        "paragraph": { "rich_text": [{ "plain_text": text }] }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryCall {
    pub cursor: Option<String>,
    pub page_size: u32,
    pub filter: Option<Value>,
}

/// In-memory stand-in for the Notion API. Cursors are `c<offset>`.
#[derive(Clone, Default)]
pub struct FakeNotion {
    documents: Arc<Mutex<Vec<Value>>>,
    children: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    failing_children: Arc<Mutex<HashSet<String>>>,
    fail_listing: Arc<AtomicBool>,
    query_calls: Arc<Mutex<Vec<QueryCall>>>,
    children_calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

fn parse_cursor(cursor: Option<&str>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .strip_prefix('c')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| anyhow!("invalid cursor {}", c)),
    }
}

impl FakeNotion {
    pub fn with_documents(documents: Vec<Value>) -> Self {
        Self {
            documents: Arc::new(Mutex::new(documents)),
            ..Default::default()
        }
    }

    pub async fn set_documents(&self, documents: Vec<Value>) {
        *self.documents.lock().await = documents;
    }

    pub async fn set_children(&self, page_id: &str, blocks: Vec<Value>) {
        self.children.lock().await.insert(page_id.to_string(), blocks);
    }

    pub async fn fail_children_for(&self, page_id: &str) {
        self.failing_children.lock().await.insert(page_id.to_string());
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    pub async fn query_calls(&self) -> Vec<QueryCall> {
        self.query_calls.lock().await.clone()
    }

    pub async fn children_calls(&self) -> Vec<(String, Option<String>)> {
        self.children_calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl NotionService for FakeNotion {
    async fn query_database(
        &self,
        _database_id: &str,
        start_cursor: Option<&str>,
        page_size: u32,
        filter: Option<&Value>,
    ) -> Result<ListPage> {
        self.query_calls.lock().await.push(QueryCall {
            cursor: start_cursor.map(str::to_string),
            page_size,
            filter: filter.cloned(),
        });
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(anyhow!("listing unavailable"));
        }
        let docs = self.documents.lock().await;
        let offset = parse_cursor(start_cursor)?.min(docs.len());
        let end = (offset + page_size as usize).min(docs.len());
        let has_more = end < docs.len();
        Ok(ListPage {
            results: docs[offset..end].to_vec(),
            next_cursor: has_more.then(|| format!("c{}", end)),
            has_more,
        })
    }

    async fn list_block_children(
        &self,
        block_id: &str,
        start_cursor: Option<&str>,
        _page_size: u32,
    ) -> Result<ListPage> {
        self.children_calls
            .lock()
            .await
            .push((block_id.to_string(), start_cursor.map(str::to_string)));
        if self.failing_children.lock().await.contains(block_id) {
            return Err(anyhow!("children unavailable for {}", block_id));
        }
        let children = self
            .children
            .lock()
            .await
            .get(block_id)
            .cloned()
            .unwrap_or_default();
        let offset = parse_cursor(start_cursor)?.min(children.len());
        let end = (offset + CHILDREN_CHUNK).min(children.len());
        let has_more = end < children.len();
        Ok(ListPage {
            results: children[offset..end].to_vec(),
            next_cursor: has_more.then(|| format!("c{}", end)),
            has_more,
        })
    }
}
