//! Row models persisted by the repository.
//!
//! Keep these structs focused on the data stored in or returned by queries.
//! Pipeline logic lives in `crate::sync`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A normalized wiki page as stored in `pages`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRow {
    pub id: String,
    pub title: String,
    pub category: String,
    pub authors: Option<Vec<String>>,
    pub status: Option<String>,
    pub url: String,
    pub properties: Value,
    pub raw: Value,
    pub created_time: Option<DateTime<Utc>>,
    pub last_edited_time: Option<DateTime<Utc>>,
    pub last_synced_at: DateTime<Utc>,
}

/// One child block of a page as stored in `blocks`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub id: String,
    pub page_id: String,
    pub block_type: String,
    pub content: Value,
    pub has_children: bool,
    pub sort_index: i64,
    pub created_time: Option<DateTime<Utc>>,
    pub last_edited_time: Option<DateTime<Utc>>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}
