use super::models::{
    checkbox_update, habit_query_body, map_habits, map_tasks, properties_patch, status_update,
    task_query_body, title_property_name, DatabaseResponse, QueryResponse,
};
use super::retry::{should_retry, RetryPolicy};
use super::NotionApi;
use async_trait::async_trait;
use nudge_api::{
    AuthError, ConfigStateError, DatabaseConfig, Record, Result, SyncError, TokenStore,
    DEFAULT_NOTION_VERSION,
};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest error body kept in messages, in characters.
const MAX_ERROR_BODY: usize = 500;

pub struct NotionClient {
    client: reqwest::Client,
    base_url: String,
    version: String,
    timeout: Duration,
    retry: RetryPolicy,
    token_store: Arc<dyn TokenStore>,
}

impl NotionClient {
    pub fn new(token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
            version: DEFAULT_NOTION_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            token_store,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Version sent when a call passes an empty one.
    pub fn with_notion_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_retry(mut self, max_retries: u32, wait: Duration) -> Self {
        self.retry = RetryPolicy::new(max_retries, wait);
        self
    }

    /// Per-request timeout; retry waits are not counted against it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn effective_version<'a>(&'a self, api_version: &'a str) -> &'a str {
        if api_version.is_empty() {
            &self.version
        } else {
            api_version
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let token = self.token_store.get_token().await?;
        if token.trim().is_empty() {
            return Err(AuthError::TokenEmpty.into());
        }
        Ok(token)
    }

    /// Helper to create better error messages from reqwest errors
    fn format_reqwest_error(e: &reqwest::Error, url: &str, operation: &str) -> String {
        if e.is_timeout() {
            format!("Failed to {} for {}: timeout - request took too long", operation, url)
        } else if e.is_connect() {
            format!(
                "Failed to {} for {}: connection error - check network connectivity and DNS. Error: {}",
                operation, url, e
            )
        } else if e.is_request() {
            format!("Failed to {} for {}: request error. Error: {}", operation, url, e)
        } else if e.is_body() || e.is_decode() {
            format!("Failed to {} for {}: could not read response body. Error: {}", operation, url, e)
        } else {
            format!("Failed to {} for {}: {}. Debug details: {:?}", operation, url, e, e)
        }
    }

    /// Sends one JSON request with auth headers and the retry schedule.
    ///
    /// Returns the raw body of the first 2xx response.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        api_version: &str,
        operation: &str,
    ) -> Result<String> {
        let token = self.bearer_token().await?;
        let url = format!("{}{}", self.base_url, path);

        let mut attempt: u32 = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header("Notion-Version", api_version)
                .header(CONTENT_TYPE, "application/json")
                .timeout(self.timeout);
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!("[NotionClient] {} {} (attempt {})", method, url, attempt + 1);

            let (err, wait) = match request.send().await {
                Err(e) => {
                    let message = Self::format_reqwest_error(&e, &url, operation);
                    (
                        SyncError::Transient {
                            status: None,
                            message,
                        },
                        self.retry.wait,
                    )
                }
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.text().await.map_err(|e| SyncError::Decode {
                            message: Self::format_reqwest_error(&e, &url, operation),
                        });
                    }

                    let code = status.as_u16();
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let text = response.text().await.unwrap_or_default();
                    let body = truncate_body(&text);

                    if !should_retry(code) {
                        warn!(
                            "[NotionClient] Failed to {}: HTTP {} from {}: {}",
                            operation, code, url, body
                        );
                        return Err(SyncError::Permanent { status: code, body });
                    }
                    (
                        SyncError::Transient {
                            status: Some(code),
                            message: body,
                        },
                        self.retry.wait_for(code, retry_after.as_deref()),
                    )
                }
            };

            if attempt >= self.retry.max_retries {
                warn!(
                    "[NotionClient] Giving up on {} after {} attempts: {}",
                    operation,
                    attempt + 1,
                    err
                );
                return Err(err);
            }
            attempt += 1;
            warn!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                "[NotionClient] Retrying {}: {}",
                operation,
                err
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn send_decoded<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        api_version: &str,
        operation: &str,
    ) -> Result<T> {
        let text = self.send(method, path, body, api_version, operation).await?;
        serde_json::from_str(&text).map_err(|e| SyncError::Decode {
            message: format!("{}: {}", operation, e),
        })
    }

    async fn fetch_database(&self, database_id: &str, api_version: &str) -> Result<DatabaseResponse> {
        let database_id = database_id.trim();
        if database_id.is_empty() {
            return Err(SyncError::missing("database_id"));
        }
        let version = self.effective_version(api_version);
        if version.is_empty() {
            return Err(SyncError::missing("notion_version"));
        }
        let path = format!("/v1/databases/{}", database_id);
        self.send_decoded(Method::GET, &path, None, version, "retrieve database")
            .await
    }
}

/// Trims and caps a response body for error messages on a char boundary.
fn truncate_body(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY {
        let head: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
        format!("{}... (truncated)", head)
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl NotionApi for NotionClient {
    #[tracing::instrument(skip(self, db), fields(data_source = %db.data_source_id))]
    async fn query_by_status(
        &self,
        db: &DatabaseConfig,
        api_version: &str,
        max_results: u32,
        status_value: &str,
    ) -> Result<Vec<Record>> {
        let version = self.effective_version(api_version);
        let status_type = db.validate_for_status_query(status_value, version)?;
        let body = task_query_body(&db.status_property_name, status_type, status_value, max_results);
        let path = format!("/v1/data_sources/{}/query", db.data_source_id);

        let response: QueryResponse = self
            .send_decoded(Method::POST, &path, Some(&body), version, "query data source")
            .await?;
        let tasks = map_tasks(
            response.results,
            &db.title_property_name,
            &db.status_property_name,
        );
        info!("[NotionClient] Fetched {} tasks from {}", tasks.len(), db.key);
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, db))]
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
        let version = self.effective_version(api_version);
        let status_type = db.validate_for_update(status_value, version)?;
        let body = properties_patch(
            &db.status_property_name,
            status_update(status_type, status_value),
        );
        let path = format!("/v1/pages/{}", page_id.trim());

        self.send(Method::PATCH, &path, Some(&body), version, "update page status")
            .await?;
        info!("[NotionClient] Set status of {} to '{}'", page_id, status_value);
        Ok(())
    }

    #[tracing::instrument(skip(self, db), fields(data_source = %db.data_source_id))]
    async fn query_habits_today(
        &self,
        db: &DatabaseConfig,
        checkbox_property: &str,
        api_version: &str,
        max_results: u32,
    ) -> Result<Vec<Record>> {
        let version = self.effective_version(api_version);
        db.validate_for_habit_query(checkbox_property, version)?;
        let body = habit_query_body(max_results);
        let path = format!("/v1/data_sources/{}/query", db.data_source_id);

        let response: QueryResponse = self
            .send_decoded(Method::POST, &path, Some(&body), version, "query habits")
            .await?;
        let habits = map_habits(
            response.results,
            &db.title_property_name,
            checkbox_property.trim(),
        );
        info!("[NotionClient] Fetched {} habits from {}", habits.len(), db.key);
        Ok(habits)
    }

    #[tracing::instrument(skip(self, db))]
    async fn update_checkbox(
        &self,
        page_id: &str,
        db: &DatabaseConfig,
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
        let version = self.effective_version(api_version);
        if version.is_empty() {
            return Err(SyncError::missing("notion_version"));
        }
        let body = properties_patch(checkbox_property, checkbox_update(checked));
        let path = format!("/v1/pages/{}", page_id.trim());

        self.send(Method::PATCH, &path, Some(&body), version, "update page checkbox")
            .await?;
        info!(
            "[NotionClient] Set {} of {} ({}) to {}",
            checkbox_property, page_id, db.key, checked
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn resolve_data_source_id(
        &self,
        database_id: &str,
        api_version: &str,
    ) -> Result<String> {
        let database = self.fetch_database(database_id, api_version).await?;
        match database.data_sources.as_slice() {
            [] => Err(ConfigStateError::NoDataSource.into()),
            [only] => Ok(only.id.clone()),
            many => Err(ConfigStateError::MultipleDataSources { count: many.len() }.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn resolve_title_property_name(
        &self,
        database_id: &str,
        api_version: &str,
    ) -> Result<String> {
        let database = self.fetch_database(database_id, api_version).await?;
        title_property_name(&database)
            .map(str::to_string)
            .ok_or_else(|| ConfigStateError::TitlePropertyNotFound.into())
    }
}
