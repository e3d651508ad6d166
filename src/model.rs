use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a sync run. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Error => "error",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "completed_with_errors" => Some(RunStatus::CompletedWithErrors),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Which stage a recorded failure came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Page metadata could not be stored.
    Page,
    /// A single block could not be stored.
    Block,
    /// Anything else that failed while processing one page.
    PageProcess,
}

/// One recovered failure, as serialized into the run row and HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncError {
    pub id: String,
    pub error: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
}

/// Append-only collector of per-page and per-block failures.
#[derive(Debug, Default, Clone)]
pub struct ErrorCollector {
    errors: Vec<SyncError>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: impl Into<String>, kind: ErrorKind, err: &anyhow::Error) {
        self.errors.push(SyncError {
            id: id.into(),
            error: format!("{:#}", err),
            kind,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn as_slice(&self) -> &[SyncError] {
        &self.errors
    }

    pub fn into_vec(self) -> Vec<SyncError> {
        self.errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub pages_count: i64,
    pub blocks_count: i64,
    pub errors: Option<String>,
}
