//! Read-only summary of the most recent sync, served on `GET /sync-status`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{self, CategoryCount, Pool};
use crate::model::SyncRun;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub last_sync: Option<SyncRun>,
    pub time_since_last_sync: Option<String>,
    pub total_pages: i64,
    pub categories: Vec<CategoryCount>,
}

pub async fn load_status(pool: &Pool, now: DateTime<Utc>) -> Result<SyncStatusReport> {
    let last_sync = db::latest_run(pool).await?;
    let time_since_last_sync = last_sync
        .as_ref()
        .map(|run| time_since(run.finished_at.unwrap_or(run.started_at), now));
    Ok(SyncStatusReport {
        last_sync,
        time_since_last_sync,
        total_pages: db::count_pages(pool).await?,
        categories: db::category_counts(pool).await?,
    })
}

/// Human-readable elapsed time, e.g. `5 minutes ago`.
pub fn time_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (value, unit) = match secs {
        0..=59 => return "just now".to_string(),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}
