//! Notion REST client for nudge
//!
//! `NotionApi` is the seam the sync engine talks to. `NotionClient` is the
//! reqwest-backed implementation; `FakeNotionApi` keeps pages in memory for
//! tests and offline runs.

pub mod client;
pub mod fake;
pub mod models;
pub mod retry;

pub use client::NotionClient;
pub use fake::FakeNotionApi;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use nudge_api::{DatabaseConfig, Record, Result};

/// Operations against one Notion workspace.
///
/// Every method validates its inputs before any request is made and fails
/// with `SyncError::Validation` without retrying.
#[async_trait]
pub trait NotionApi: Send + Sync {
    /// Pages of `db` whose status property equals `status_value`, most
    /// recently edited first.
    async fn query_by_status(
        &self,
        db: &DatabaseConfig,
        api_version: &str,
        max_results: u32,
        status_value: &str,
    ) -> Result<Vec<Record>>;

    async fn update_status(
        &self,
        page_id: &str,
        db: &DatabaseConfig,
        api_version: &str,
        status_value: &str,
    ) -> Result<()>;

    /// Every habit page with `checked` read from `checkbox_property`.
    async fn query_habits_today(
        &self,
        db: &DatabaseConfig,
        checkbox_property: &str,
        api_version: &str,
        max_results: u32,
    ) -> Result<Vec<Record>>;

    async fn update_checkbox(
        &self,
        page_id: &str,
        db: &DatabaseConfig,
        checkbox_property: &str,
        api_version: &str,
        checked: bool,
    ) -> Result<()>;

    /// The single data source behind a database.
    async fn resolve_data_source_id(&self, database_id: &str, api_version: &str)
        -> Result<String>;

    /// Name of the database's title-typed property.
    async fn resolve_title_property_name(
        &self,
        database_id: &str,
        api_version: &str,
    ) -> Result<String>;
}
