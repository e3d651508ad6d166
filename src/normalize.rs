//! Extraction of stable page fields from a Notion property bag.
//!
//! Every path here degrades to a default instead of failing: a page whose
//! properties are missing or malformed still produces a row.

use serde::Deserialize;
use serde_json::Value;

pub const UNTITLED: &str = "Untitled";

/// Property names consulted for each extracted field, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    pub category: Vec<String>,
    pub authors: Vec<String>,
    pub status: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDocument {
    pub title: String,
    pub category: String,
    pub authors: Option<Vec<String>>,
    pub status: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SelectOption {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Person {
    #[serde(default)]
    pub name: Option<String>,
}

/// The property variants the normalizer understands.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title { title: Vec<RichText> },
    RichText { rich_text: Vec<RichText> },
    Select { select: Option<SelectOption> },
    MultiSelect { multi_select: Vec<SelectOption> },
    Status { status: Option<SelectOption> },
    People { people: Vec<Person> },
    #[serde(other)]
    Unsupported,
}

impl PropertyValue {
    /// Parses one property. Anything that does not fit a known variant is
    /// `Unsupported`.
    pub fn from_json(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(PropertyValue::Unsupported)
    }
}

/// Name-sorted view of a page's property bag.
pub fn parse_properties(document: &Value) -> Vec<(String, PropertyValue)> {
    let Some(props) = document.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut parsed: Vec<(String, PropertyValue)> = props
        .iter()
        .map(|(name, value)| (name.clone(), PropertyValue::from_json(value)))
        .collect();
    parsed.sort_by(|a, b| a.0.cmp(&b.0));
    parsed
}

pub fn normalize(document: &Value, fields: &FieldNames) -> NormalizedDocument {
    let props = parse_properties(document);
    let id = document.get("id").and_then(Value::as_str).unwrap_or_default();
    NormalizedDocument {
        title: extract_title(&props),
        category: extract_category(&props, &fields.category),
        authors: extract_authors(&props, &fields.authors),
        status: extract_status(&props, &fields.status),
        url: page_url(id),
    }
}

fn lookup<'a>(props: &'a [(String, PropertyValue)], name: &str) -> Option<&'a PropertyValue> {
    props.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn extract_title(props: &[(String, PropertyValue)]) -> String {
    props
        .iter()
        .find_map(|(_, value)| match value {
            PropertyValue::Title { title } => title.first(),
            _ => None,
        })
        .map(|run| run.plain_text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn select_label(option: &Option<SelectOption>) -> Option<String> {
    option
        .as_ref()
        .map(|o| o.name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn extract_category(props: &[(String, PropertyValue)], candidates: &[String]) -> String {
    let named = candidates
        .iter()
        .filter_map(|name| lookup(props, name))
        .find_map(|value| match value {
            PropertyValue::Select { select } => select_label(select),
            _ => None,
        });
    named
        .or_else(|| {
            props.iter().find_map(|(_, value)| match value {
                PropertyValue::Select { select } => select_label(select),
                _ => None,
            })
        })
        .unwrap_or_default()
}

fn extract_authors(props: &[(String, PropertyValue)], candidates: &[String]) -> Option<Vec<String>> {
    candidates
        .iter()
        .filter_map(|name| lookup(props, name))
        .find_map(|value| {
            let authors: Vec<String> = match value {
                PropertyValue::People { people } => people
                    .iter()
                    .filter_map(|p| p.name.as_deref())
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect(),
                PropertyValue::MultiSelect { multi_select } => multi_select
                    .iter()
                    .map(|o| o.name.trim())
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect(),
                PropertyValue::RichText { rich_text } => {
                    let text: String = rich_text.iter().map(|r| r.plain_text.as_str()).collect();
                    let text = text.trim();
                    if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![text.to_string()]
                    }
                }
                _ => Vec::new(),
            };
            (!authors.is_empty()).then_some(authors)
        })
}

fn extract_status(props: &[(String, PropertyValue)], candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|name| lookup(props, name))
        .find_map(|value| match value {
            PropertyValue::Select { select } => select_label(select),
            PropertyValue::Status { status } => select_label(status),
            _ => None,
        })
}

/// Canonical public URL of a page, derived from its id alone.
pub fn page_url(id: &str) -> String {
    format!("https://www.notion.so/{}", id.replace('-', ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> FieldNames {
        FieldNames {
            category: vec!["Category".into(), "分类".into()],
            authors: vec!["Authors".into()],
            status: vec!["Status".into()],
        }
    }

    fn page(properties: Value) -> Value {
        json!({ "id": "1234-abcd", "object": "page", "properties": properties })
    }

    #[test]
    fn extracts_all_fields() {
        let doc = page(json!({
            "Name": { "id": "title", "type": "title", "title": [
                { "plain_text": "Getting started" }, { "plain_text": " (draft)" }
            ]},
            "Category": { "type": "select", "select": { "name": "Guides" } },
            "Authors": { "type": "people", "people": [{ "name": "Ada" }, { "name": null }] },
            "Status": { "type": "status", "status": { "name": "Published" } }
        }));
        let n = normalize(&doc, &fields());
        assert_eq!(n.title, "Getting started");
        assert_eq!(n.category, "Guides");
        assert_eq!(n.authors, Some(vec!["Ada".to_string()]));
        assert_eq!(n.status.as_deref(), Some("Published"));
        assert_eq!(n.url, "https://www.notion.so/1234abcd");
    }

    #[test]
    fn malformed_title_falls_back_to_placeholder() {
        let cases = [
            json!({}),
            json!({ "Name": { "type": "title", "title": [] } }),
            json!({ "Name": { "type": "title", "title": "not-a-list" } }),
            json!({ "Name": { "type": "title", "title": [{ "plain_text": "   " }] } }),
            json!({ "Name": { "type": "title" } }),
        ];
        for props in cases {
            assert_eq!(normalize(&page(props), &fields()).title, UNTITLED);
        }
        assert_eq!(normalize(&json!(null), &fields()).title, UNTITLED);
        assert_eq!(normalize(&json!({ "properties": 7 }), &fields()).title, UNTITLED);
    }

    #[test]
    fn category_uses_localized_alias() {
        let doc = page(json!({ "分类": { "type": "select", "select": { "name": "教程" } } }));
        assert_eq!(normalize(&doc, &fields()).category, "教程");
    }

    #[test]
    fn category_falls_back_to_first_select_property() {
        let doc = page(json!({
            "Category": { "type": "rich_text", "rich_text": [] },
            "Zone": { "type": "select", "select": { "name": "Z" } },
            "Area": { "type": "select", "select": { "name": "A" } }
        }));
        assert_eq!(normalize(&doc, &fields()).category, "A");
    }

    #[test]
    fn category_is_empty_when_nothing_matches() {
        let doc = page(json!({
            "Category": { "type": "select", "select": null },
            "Tags": { "type": "multi_select", "multi_select": [{ "name": "x" }] }
        }));
        assert_eq!(normalize(&doc, &fields()).category, "");
    }

    #[test]
    fn authors_from_multi_select_and_rich_text() {
        let doc = page(json!({
            "Authors": { "type": "multi_select", "multi_select": [{ "name": "Kim" }, { "name": "Lee" }] }
        }));
        assert_eq!(
            normalize(&doc, &fields()).authors,
            Some(vec!["Kim".to_string(), "Lee".to_string()])
        );

        let doc = page(json!({
            "Authors": { "type": "rich_text", "rich_text": [{ "plain_text": "Wiki " }, { "plain_text": "Team" }] }
        }));
        assert_eq!(
            normalize(&doc, &fields()).authors,
            Some(vec!["Wiki Team".to_string()])
        );

        let doc = page(json!({ "Authors": { "type": "people", "people": [] } }));
        assert_eq!(normalize(&doc, &fields()).authors, None);
    }

    #[test]
    fn status_accepts_select_and_ignores_other_shapes() {
        let doc = page(json!({ "Status": { "type": "select", "select": { "name": "Draft" } } }));
        assert_eq!(normalize(&doc, &fields()).status.as_deref(), Some("Draft"));

        let doc = page(json!({ "Status": { "type": "checkbox", "checkbox": true } }));
        assert_eq!(normalize(&doc, &fields()).status, None);
    }

    #[test]
    fn unknown_property_types_are_unsupported() {
        let value = json!({ "type": "formula", "formula": { "number": 3 } });
        assert_eq!(PropertyValue::from_json(&value), PropertyValue::Unsupported);
        let value = json!({ "type": "select", "select": 42 });
        assert_eq!(PropertyValue::from_json(&value), PropertyValue::Unsupported);
    }
}
