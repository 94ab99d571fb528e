//! Notion wire models and their mapping to `Record`
//!
//! Only the fields nudge reads are modelled; everything else in a page or
//! database payload is ignored by serde.

use nudge_api::{Record, StatusPropertyType};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

/// Notion rejects page sizes above this.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<Page>,
}

#[derive(Debug, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub last_edited_time: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PropertyValue {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Vec<RichText>,
    #[serde(default)]
    pub status: Option<SelectOption>,
    #[serde(default)]
    pub select: Option<SelectOption>,
    #[serde(default)]
    pub checkbox: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectOption {
    #[serde(default)]
    pub name: String,
}

/// `GET /v1/databases/{id}`
#[derive(Debug, Deserialize)]
pub struct DatabaseResponse {
    #[serde(default)]
    pub data_sources: Vec<DataSourceRef>,
    /// Ordered so that title lookup is deterministic.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
}

#[derive(Debug, Deserialize)]
pub struct DataSourceRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default)]
    pub kind: String,
}

pub fn status_filter(property: &str, status_type: StatusPropertyType, value: &str) -> Value {
    match status_type {
        StatusPropertyType::Select => json!({
            "property": property,
            "select": { "equals": value },
        }),
        StatusPropertyType::Status => json!({
            "property": property,
            "status": { "equals": value },
        }),
    }
}

pub fn status_update(status_type: StatusPropertyType, value: &str) -> Value {
    match status_type {
        StatusPropertyType::Select => json!({ "select": { "name": value } }),
        StatusPropertyType::Status => json!({ "status": { "name": value } }),
    }
}

pub fn checkbox_update(checked: bool) -> Value {
    json!({ "checkbox": checked })
}

/// Tasks in the given status, most recently edited first.
pub fn task_query_body(
    status_property: &str,
    status_type: StatusPropertyType,
    status_value: &str,
    max_results: u32,
) -> Value {
    let mut body = json!({
        "filter": status_filter(status_property, status_type, status_value),
        "sorts": [{
            "timestamp": "last_edited_time",
            "direction": "descending",
        }],
    });
    apply_page_size(&mut body, max_results);
    body
}

/// All habits, newest first. Habits are not status-gated.
pub fn habit_query_body(max_results: u32) -> Value {
    let mut body = json!({
        "sorts": [{
            "timestamp": "created_time",
            "direction": "descending",
        }],
    });
    apply_page_size(&mut body, max_results);
    body
}

fn apply_page_size(body: &mut Value, max_results: u32) {
    if max_results > 0 {
        body["page_size"] = json!(max_results.min(MAX_PAGE_SIZE));
    }
}

pub fn properties_patch(property: &str, value: Value) -> Value {
    json!({ "properties": { property: value } })
}

pub fn map_tasks(pages: Vec<Page>, title_property: &str, status_property: &str) -> Vec<Record> {
    pages
        .into_iter()
        .map(|page| {
            let title = page
                .properties
                .get(title_property)
                .map(extract_title)
                .unwrap_or_default();
            let status = page
                .properties
                .get(status_property)
                .map(extract_status)
                .unwrap_or_default();
            Record {
                id: page.id,
                title,
                url: page.url,
                status,
                last_edited_time: page.last_edited_time,
                checked: false,
            }
        })
        .collect()
}

pub fn map_habits(pages: Vec<Page>, title_property: &str, checkbox_property: &str) -> Vec<Record> {
    pages
        .into_iter()
        .map(|page| {
            let title = page
                .properties
                .get(title_property)
                .map(extract_title)
                .unwrap_or_default();
            let checked = page
                .properties
                .get(checkbox_property)
                .map(extract_checkbox)
                .unwrap_or(false);
            Record {
                id: page.id,
                title,
                url: page.url,
                status: String::new(),
                last_edited_time: page.last_edited_time,
                checked,
            }
        })
        .collect()
}

/// Joins every fragment of a `title` property; mentions and styled runs
/// split a title into several fragments.
pub fn extract_title(prop: &PropertyValue) -> String {
    if prop.kind != "title" {
        return String::new();
    }
    prop.title.iter().map(|t| t.plain_text.as_str()).collect()
}

pub fn extract_status(prop: &PropertyValue) -> String {
    match prop.kind.as_str() {
        "status" => prop.status.as_ref().map(|s| s.name.clone()),
        "select" => prop.select.as_ref().map(|s| s.name.clone()),
        _ => None,
    }
    .unwrap_or_default()
}

pub fn extract_checkbox(prop: &PropertyValue) -> bool {
    prop.kind == "checkbox" && prop.checkbox.unwrap_or(false)
}

/// The one title-typed property of a database schema.
pub fn title_property_name(database: &DatabaseResponse) -> Option<&str> {
    database
        .properties
        .iter()
        .find(|(_, schema)| schema.kind == "title")
        .map(|(name, _)| name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_json() -> Value {
        json!({
            "object": "page",
            "id": "page-1",
            "url": "https://www.notion.so/page-1",
            "created_time": "2025-01-01T00:00:00.000Z",
            "last_edited_time": "2025-01-02T03:04:05.000Z",
            "properties": {
                "Name": {
                    "id": "title",
                    "type": "title",
                    "title": [
                        { "type": "text", "plain_text": "Write " },
                        { "type": "text", "plain_text": "report" }
                    ]
                },
                "Status": {
                    "id": "abc",
                    "type": "status",
                    "status": { "id": "s1", "name": "In progress", "color": "blue" }
                },
                "Stage": {
                    "id": "def",
                    "type": "select",
                    "select": null
                },
                "水": { "id": "ghi", "type": "checkbox", "checkbox": true },
                "Estimate": { "id": "jkl", "type": "number", "number": 3 }
            }
        })
    }

    #[test]
    fn test_map_task_page() {
        let page: Page = serde_json::from_value(page_json()).unwrap();
        let records = map_tasks(vec![page], "Name", "Status");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "page-1");
        assert_eq!(records[0].title, "Write report");
        assert_eq!(records[0].status, "In progress");
        assert_eq!(records[0].last_edited_time, "2025-01-02T03:04:05.000Z");
        assert!(!records[0].checked);
    }

    #[test]
    fn test_missing_or_null_properties_map_to_empty() {
        let page: Page = serde_json::from_value(page_json()).unwrap();
        let records = map_tasks(vec![page], "Missing", "Stage");
        assert_eq!(records[0].title, "");
        assert_eq!(records[0].status, "");
    }

    #[test]
    fn test_map_habit_page_reads_checkbox() {
        let page: Page = serde_json::from_value(page_json()).unwrap();
        let records = map_habits(vec![page], "Name", "水");
        assert!(records[0].checked);
        assert_eq!(records[0].status, "");

        let page: Page = serde_json::from_value(page_json()).unwrap();
        let records = map_habits(vec![page], "Name", "木");
        assert!(!records[0].checked);
    }

    #[test]
    fn test_status_and_select_shapes_differ() {
        assert_eq!(
            status_filter("Status", StatusPropertyType::Status, "Doing"),
            json!({"property": "Status", "status": {"equals": "Doing"}})
        );
        assert_eq!(
            status_filter("Stage", StatusPropertyType::Select, "Doing"),
            json!({"property": "Stage", "select": {"equals": "Doing"}})
        );
        assert_eq!(
            status_update(StatusPropertyType::Select, "Done"),
            json!({"select": {"name": "Done"}})
        );
        assert_eq!(
            status_update(StatusPropertyType::Status, "Done"),
            json!({"status": {"name": "Done"}})
        );
    }

    #[test]
    fn test_query_bodies() {
        let body = task_query_body("Status", StatusPropertyType::Status, "Doing", 30);
        assert_eq!(body["sorts"][0]["timestamp"], "last_edited_time");
        assert_eq!(body["page_size"], 30);

        let body = habit_query_body(0);
        assert!(body.get("filter").is_none());
        assert!(body.get("page_size").is_none());
        assert_eq!(body["sorts"][0]["timestamp"], "created_time");

        let body = habit_query_body(500);
        assert_eq!(body["page_size"], MAX_PAGE_SIZE);
    }

    #[test]
    fn test_title_property_lookup() {
        let db: DatabaseResponse = serde_json::from_value(json!({
            "object": "database",
            "data_sources": [{ "id": "ds-1", "name": "Tasks" }],
            "properties": {
                "Status": { "type": "status" },
                "Task name": { "type": "title" }
            }
        }))
        .unwrap();
        assert_eq!(title_property_name(&db), Some("Task name"));
        assert_eq!(db.data_sources[0].id, "ds-1");
    }
}
