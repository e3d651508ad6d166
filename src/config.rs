//! Configuration loader and validator for the wiki sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::normalize::FieldNames;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub notion: Notion,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret expected as the bearer token on `POST /sync`.
    pub sync_secret: String,
    /// How long a sync lease stays valid before another invocation may take it over.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,
}

/// Notion API settings and the database being mirrored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notion {
    pub token: String,
    pub version: String,
    pub database_id: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub fields: Fields,
}

/// Property names the normalizer looks up, in priority order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fields {
    #[serde(default = "default_category_fields")]
    pub category: Vec<String>,
    #[serde(default = "default_author_fields")]
    pub authors: Vec<String>,
    #[serde(default = "default_status_fields")]
    pub status: Vec<String>,
    /// Status label matched when `publishedOnly` is requested.
    #[serde(default = "default_published_value")]
    pub published_value: String,
    /// Notion type of the status property, which decides the filter shape.
    #[serde(default)]
    pub status_type: StatusFilterType,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilterType {
    #[default]
    Select,
    Status,
}

impl Default for Fields {
    fn default() -> Self {
        Self {
            category: default_category_fields(),
            authors: default_author_fields(),
            status: default_status_fields(),
            published_value: default_published_value(),
            status_type: StatusFilterType::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}

fn default_lease_ttl() -> u64 {
    1800
}

fn default_timeout() -> u64 {
    30
}

fn default_category_fields() -> Vec<String> {
    vec!["Category".into(), "分类".into()]
}

fn default_author_fields() -> Vec<String> {
    vec!["Authors".into(), "Author".into()]
}

fn default_status_fields() -> Vec<String> {
    vec!["Status".into()]
}

fn default_published_value() -> String {
    "Published".into()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the default file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/wiki.db", self.app.data_dir))
    }

    pub fn field_names(&self) -> FieldNames {
        FieldNames {
            category: self.notion.fields.category.clone(),
            authors: self.notion.fields.authors.clone(),
            status: self.notion.fields.status.clone(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind must be non-empty"));
    }
    if cfg.app.sync_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("app.sync_secret must be non-empty"));
    }
    if cfg.app.lease_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("app.lease_ttl_seconds must be > 0"));
    }

    if cfg.notion.token.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.token must be non-empty"));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if cfg.notion.database_id.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.database_id must be non-empty"));
    }
    if cfg.notion.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "notion.request_timeout_seconds must be > 0",
        ));
    }

    let f = &cfg.notion.fields;
    if f.category.iter().all(|name| name.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "notion.fields.category must name at least one property",
        ));
    }
    if f.published_value.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "notion.fields.published_value must be non-empty",
        ));
    }

    Ok(())
}

/// Returns the canonical example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind: "127.0.0.1:8080"
  sync_secret: "YOUR_SYNC_SECRET"
  lease_ttl_seconds: 1800

notion:
  token: "YOUR_NOTION_INTEGRATION_TOKEN"
  version: "2022-06-28"
  database_id: "NOTION_WIKI_DATABASE_ID"
  request_timeout_seconds: 30

  fields:
    category:
      - "Category"
      - "分类"
    authors:
      - "Authors"
      - "Author"
    status:
      - "Status"
    published_value: "Published"
    status_type: "select"
"#
}
