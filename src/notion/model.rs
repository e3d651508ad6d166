use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug)]
pub struct DatabaseProperty {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Deserialize, Debug)]
pub struct RetrieveDatabaseResp {
    pub id: String,
    #[serde(default)]
    pub title: Vec<Value>,
    pub properties: std::collections::HashMap<String, DatabaseProperty>,
}

/// One page of a cursor-paginated Notion list endpoint.
///
/// Both `databases/{id}/query` and `blocks/{id}/children` share this shape.
/// Results are kept as raw JSON so the full payload can be persisted verbatim.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}
