//! In-memory Notion for tests and offline runs
//!
//! FakeNotionApi implements NotionApi against a map of pages per data source:
//! - Inputs go through the same validation as the HTTP client
//! - Writes mutate the stored pages and bump their edit time
//! - Every call that passes validation is logged, so tests can assert that
//!   nothing was sent
//! - Errors can be queued with `fail_next` to simulate remote failures

use async_trait::async_trait;
use nudge_api::{ConfigStateError, DatabaseConfig, Record, Result, SyncError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::MAX_PAGE_SIZE;
use crate::NotionApi;

#[derive(Debug, Clone, Default)]
struct FakePage {
    id: String,
    title: String,
    status: String,
    checkboxes: HashMap<String, bool>,
    created: u64,
    edited: u64,
}

impl FakePage {
    fn to_record(&self, checkbox_property: Option<&str>) -> Record {
        Record {
            id: self.id.clone(),
            title: self.title.clone(),
            url: format!("https://www.notion.so/{}", self.id.replace('-', "")),
            status: if checkbox_property.is_some() {
                String::new()
            } else {
                self.status.clone()
            },
            last_edited_time: format!("{:020}", self.edited),
            checked: checkbox_property
                .and_then(|p| self.checkboxes.get(p).copied())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FakeDatabase {
    data_sources: Vec<String>,
    title_property: Option<String>,
}

#[derive(Default)]
struct FakeState {
    /// data_source_id -> pages
    pages: HashMap<String, Vec<FakePage>>,
    databases: HashMap<String, FakeDatabase>,
    calls: Vec<String>,
    failures: VecDeque<SyncError>,
}

#[derive(Default)]
pub struct FakeNotionApi {
    state: Mutex<FakeState>,
    /// Logical clock for created/edited ordering
    clock: AtomicU64,
}

impl FakeNotionApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Registers a database and its data sources for schema resolution.
    pub fn add_database(&self, database_id: &str, data_sources: &[&str], title_property: Option<&str>) {
        self.lock().databases.insert(
            database_id.to_string(),
            FakeDatabase {
                data_sources: data_sources.iter().map(|s| s.to_string()).collect(),
                title_property: title_property.map(str::to_string),
            },
        );
    }

    /// Adds a task page and returns its generated id.
    pub fn add_task(&self, data_source_id: &str, title: &str, status: &str) -> String {
        let now = self.tick();
        let page = FakePage {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            status: status.to_string(),
            created: now,
            edited: now,
            ..Default::default()
        };
        let id = page.id.clone();
        self.lock()
            .pages
            .entry(data_source_id.to_string())
            .or_default()
            .push(page);
        id
    }

    /// Adds a habit page with the given checkboxes ticked.
    pub fn add_habit(&self, data_source_id: &str, title: &str, checked: &[&str]) -> String {
        let now = self.tick();
        let page = FakePage {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            checkboxes: checked.iter().map(|c| (c.to_string(), true)).collect(),
            created: now,
            edited: now,
            ..Default::default()
        };
        let id = page.id.clone();
        self.lock()
            .pages
            .entry(data_source_id.to_string())
            .or_default()
            .push(page);
        id
    }

    /// Queues an error returned by the next call that passes validation.
    pub fn fail_next(&self, error: SyncError) {
        self.lock().failures.push_back(error);
    }

    /// Calls in order, formatted as `"<method>:<target>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        let prefix = format!("{}:", method);
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn status_of(&self, page_id: &str) -> Option<String> {
        let state = self.lock();
        find_page(&state.pages, page_id).map(|p| p.status.clone())
    }

    pub fn checkbox_of(&self, page_id: &str, property: &str) -> Option<bool> {
        let state = self.lock();
        find_page(&state.pages, page_id).map(|p| p.checkboxes.get(property).copied().unwrap_or(false))
    }

    /// Logs the call and pops a queued failure, if any.
    fn record_call(&self, method: &str, target: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("{}:{}", method, target));
        match state.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn mutate_page<F>(&self, page_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut FakePage),
    {
        let now = self.tick();
        let mut state = self.lock();
        let page = state
            .pages
            .values_mut()
            .flat_map(|pages| pages.iter_mut())
            .find(|p| p.id == page_id)
            .ok_or_else(|| not_found(page_id))?;
        f(page);
        page.edited = now;
        Ok(())
    }

    fn database(&self, database_id: &str) -> Result<FakeDatabase> {
        self.lock()
            .databases
            .get(database_id)
            .cloned()
            .ok_or_else(|| not_found(database_id))
    }
}

fn find_page<'a>(pages: &'a HashMap<String, Vec<FakePage>>, page_id: &str) -> Option<&'a FakePage> {
    pages.values().flat_map(|p| p.iter()).find(|p| p.id == page_id)
}

fn not_found(id: &str) -> SyncError {
    SyncError::Permanent {
        status: 404,
        body: format!(
            r#"{{"object":"error","status":404,"code":"object_not_found","message":"Could not find {}"}}"#,
            id
        ),
    }
}

fn limit(max_results: u32) -> usize {
    if max_results == 0 {
        usize::MAX
    } else {
        max_results.min(MAX_PAGE_SIZE) as usize
    }
}

fn require_resolve_inputs(database_id: &str, api_version: &str) -> Result<()> {
    if database_id.trim().is_empty() {
        return Err(SyncError::missing("database_id"));
    }
    if api_version.is_empty() {
        return Err(SyncError::missing("notion_version"));
    }
    Ok(())
}

#[async_trait]
impl NotionApi for FakeNotionApi {
    async fn query_by_status(
        &self,
        db: &DatabaseConfig,
        api_version: &str,
        max_results: u32,
        status_value: &str,
    ) -> Result<Vec<Record>> {
        db.validate_for_status_query(status_value, api_version)?;
        self.record_call("query_by_status", &db.data_source_id)?;

        let state = self.lock();
        let mut pages: Vec<&FakePage> = state
            .pages
            .get(&db.data_source_id)
            .map(|pages| pages.iter().filter(|p| p.status == status_value).collect())
            .unwrap_or_default();
        pages.sort_by(|a, b| b.edited.cmp(&a.edited));
        Ok(pages
            .into_iter()
            .take(limit(max_results))
            .map(|p| p.to_record(None))
            .collect())
    }

    async fn update_status(
        &self,
        page_id: &str,
        db: &DatabaseConfig,
        api_version: &str,
        status_value: &str,
    ) -> Result<()> {
        if page_id.trim().is_empty() {
            return Err(SyncError::missing("page_id"));
        }
        db.validate_for_update(status_value, api_version)?;
        self.record_call("update_status", page_id)?;
        self.mutate_page(page_id, |page| page.status = status_value.to_string())
    }

    async fn query_habits_today(
        &self,
        db: &DatabaseConfig,
        checkbox_property: &str,
        api_version: &str,
        max_results: u32,
    ) -> Result<Vec<Record>> {
        db.validate_for_habit_query(checkbox_property, api_version)?;
        self.record_call("query_habits_today", &db.data_source_id)?;

        let checkbox_property = checkbox_property.trim();
        let state = self.lock();
        let mut pages: Vec<&FakePage> = state
            .pages
            .get(&db.data_source_id)
            .map(|pages| pages.iter().collect())
            .unwrap_or_default();
        pages.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(pages
            .into_iter()
            .take(limit(max_results))
            .map(|p| p.to_record(Some(checkbox_property)))
            .collect())
    }

    async fn update_checkbox(
        &self,
        page_id: &str,
        _db: &DatabaseConfig,
        checkbox_property: &str,
        api_version: &str,
        checked: bool,
    ) -> Result<()> {
        if page_id.trim().is_empty() {
            return Err(SyncError::missing("page_id"));
        }
        let checkbox_property = checkbox_property.trim();
        if checkbox_property.is_empty() {
            return Err(SyncError::missing("checkbox_property_name"));
        }
        if api_version.is_empty() {
            return Err(SyncError::missing("notion_version"));
        }
        self.record_call("update_checkbox", page_id)?;
        self.mutate_page(page_id, |page| {
            page.checkboxes.insert(checkbox_property.to_string(), checked);
        })
    }

    async fn resolve_data_source_id(
        &self,
        database_id: &str,
        api_version: &str,
    ) -> Result<String> {
        require_resolve_inputs(database_id, api_version)?;
        self.record_call("resolve_data_source_id", database_id)?;
        let database = self.database(database_id.trim())?;
        match database.data_sources.as_slice() {
            [] => Err(ConfigStateError::NoDataSource.into()),
            [only] => Ok(only.clone()),
            many => Err(ConfigStateError::MultipleDataSources { count: many.len() }.into()),
        }
    }

    async fn resolve_title_property_name(
        &self,
        database_id: &str,
        api_version: &str,
    ) -> Result<String> {
        require_resolve_inputs(database_id, api_version)?;
        self.record_call("resolve_title_property_name", database_id)?;
        self.database(database_id.trim())?
            .title_property
            .ok_or_else(|| ConfigStateError::TitlePropertyNotFound.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_api::{DatabaseKind, DEFAULT_NOTION_VERSION};

    fn task_db() -> DatabaseConfig {
        DatabaseConfig {
            data_source_id: "ds-tasks".to_string(),
            title_property_name: "Name".to_string(),
            status_property_name: "Status".to_string(),
            status_in_progress: "Doing".to_string(),
            status_done: "Done".to_string(),
            status_paused: "Paused".to_string(),
            ..DatabaseConfig::new("tasks", DatabaseKind::Task)
        }
    }

    #[tokio::test]
    async fn test_query_filters_by_status_newest_edit_first() {
        let fake = FakeNotionApi::new();
        let first = fake.add_task("ds-tasks", "first", "Doing");
        let second = fake.add_task("ds-tasks", "second", "Doing");
        fake.add_task("ds-tasks", "finished", "Done");

        let db = task_db();
        fake.update_status(&first, &db, DEFAULT_NOTION_VERSION, "Doing")
            .await
            .unwrap();

        let tasks = fake
            .query_by_status(&db, DEFAULT_NOTION_VERSION, 30, "Doing")
            .await
            .unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_logged() {
        let fake = FakeNotionApi::new();
        let mut db = task_db();
        db.data_source_id.clear();

        let err = fake
            .query_by_status(&db, DEFAULT_NOTION_VERSION, 30, "Doing")
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::missing("data_source_id"));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let fake = FakeNotionApi::new();
        fake.fail_next(SyncError::Transient {
            status: Some(503),
            message: "unavailable".to_string(),
        });
        let db = task_db();
        assert!(fake
            .query_by_status(&db, DEFAULT_NOTION_VERSION, 30, "Doing")
            .await
            .unwrap_err()
            .is_retryable());
        assert!(fake
            .query_by_status(&db, DEFAULT_NOTION_VERSION, 30, "Doing")
            .await
            .is_ok());
        assert_eq!(fake.call_count("query_by_status"), 2);
    }

    #[tokio::test]
    async fn test_resolve_data_source_ambiguity() {
        let fake = FakeNotionApi::new();
        fake.add_database("db-many", &["a", "b"], Some("Name"));
        let err = fake
            .resolve_data_source_id("db-many", DEFAULT_NOTION_VERSION)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::ConfigState(ConfigStateError::MultipleDataSources { count: 2 })
        );
    }
}
