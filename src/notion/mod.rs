use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, StatusFilterType};
use crate::notion::model::{ListPage, RetrieveDatabaseResp};

pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";

/// Largest page size the Notion list endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Read side of the Notion API used by the sync pipeline.
///
/// Both methods return one page of results; callers follow `next_cursor`
/// until `has_more` is false.
#[async_trait]
pub trait NotionService: Send + Sync {
    async fn query_database(
        &self,
        database_id: &str,
        start_cursor: Option<&str>,
        page_size: u32,
        filter: Option<&Value>,
    ) -> Result<ListPage>;

    async fn list_block_children(
        &self,
        block_id: &str,
        start_cursor: Option<&str>,
        page_size: u32,
    ) -> Result<ListPage>;
}

impl NotionClient {
    pub fn new(token: String, version: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(NOTION_API_BASE).context("invalid default Notion URL")?;
        Self::with_base_url(token, version, timeout, base_url)
    }

    pub fn with_base_url(
        token: String,
        version: String,
        timeout: Duration,
        base_url: Url,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("wiki-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
            version,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.notion.token.clone(),
            cfg.notion.version.clone(),
            Duration::from_secs(cfg.notion.request_timeout_seconds),
        )
    }

    pub fn build_query_request(&self, database_id: &str, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1/databases/{}/query", database_id))
            .context("invalid Notion base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build Notion query request")
    }

    pub fn build_children_request(
        &self,
        block_id: &str,
        start_cursor: Option<&str>,
        page_size: u32,
    ) -> Result<reqwest::Request> {
        let mut endpoint = self
            .base_url
            .join(&format!("v1/blocks/{}/children", block_id))
            .context("invalid Notion base URL")?;
        {
            let mut query = endpoint.query_pairs_mut();
            query.append_pair("page_size", &page_size.min(MAX_PAGE_SIZE).to_string());
            if let Some(cursor) = start_cursor {
                query.append_pair("start_cursor", cursor);
            }
        }
        self.http
            .get(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
            .build()
            .context("failed to build Notion children request")
    }

    async fn execute_list(&self, request: reqwest::Request) -> Result<ListPage> {
        debug!(url=%request.url(), method=%request.method(), "sending notion request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Notion")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from Notion: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("notion error {}: {}", status, body));
        }

        res.json::<ListPage>()
            .await
            .context("invalid Notion list response")
    }

    pub async fn retrieve_database(&self, database_id: &str) -> Result<RetrieveDatabaseResp> {
        let url = self
            .base_url
            .join(&format!("v1/databases/{}", database_id))?;
        let res = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
            .send()
            .await
            .context("failed to reach Notion")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "notion retrieve db error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        Ok(res.json::<RetrieveDatabaseResp>().await?)
    }
}

#[async_trait]
impl NotionService for NotionClient {
    async fn query_database(
        &self,
        database_id: &str,
        start_cursor: Option<&str>,
        page_size: u32,
        filter: Option<&Value>,
    ) -> Result<ListPage> {
        let body = build_query_body(start_cursor, page_size, filter);
        let request = self.build_query_request(database_id, &body)?;
        self.execute_list(request)
            .await
            .with_context(|| format!("failed to query database {}", database_id))
    }

    async fn list_block_children(
        &self,
        block_id: &str,
        start_cursor: Option<&str>,
        page_size: u32,
    ) -> Result<ListPage> {
        let request = self.build_children_request(block_id, start_cursor, page_size)?;
        self.execute_list(request)
            .await
            .with_context(|| format!("failed to list children of {}", block_id))
    }
}

pub fn build_query_body(start_cursor: Option<&str>, page_size: u32, filter: Option<&Value>) -> Value {
    let mut body = Map::new();
    body.insert(
        "page_size".into(),
        json!(page_size.clamp(1, MAX_PAGE_SIZE)),
    );
    if let Some(cursor) = start_cursor.filter(|c| !c.is_empty()) {
        body.insert("start_cursor".into(), json!(cursor));
    }
    if let Some(filter) = filter {
        body.insert("filter".into(), filter.clone());
    }
    Value::Object(body)
}

/// Filter matching pages whose status property equals `value`.
pub fn published_filter(property: &str, value: &str, kind: StatusFilterType) -> Value {
    match kind {
        StatusFilterType::Select => json!({
            "property": property,
            "select": { "equals": value },
        }),
        StatusFilterType::Status => json!({
            "property": property,
            "status": { "equals": value },
        }),
    }
}
