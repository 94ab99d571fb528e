//! SyncEngine - the caller-facing surface of nudge
//!
//! Owns the installed configuration, the snapshot cache and the background
//! poller, and routes every request through the database resolver to the
//! Notion API:
//! - `get_tasks` / `get_habits` read through the cache, `force` bypasses it
//! - `refresh_all` refreshes every enabled database, one pass at a time
//! - every successful refresh is published as a `SnapshotEvent`

use nudge_api::{
    AuthError, Config, ConfigStateError, ConfigStore, DatabaseConfig, DatabaseKind, Record,
    Result, SyncError, TokenStore,
};
use nudge_notion::NotionApi;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::habits::{filter_unchecked, habit_checkbox_property, unique_by_title};
use crate::core::resolver::{require_kind, resolve_database};
use crate::core::{Clock, ConfigCell, Generation, SnapshotCache, SystemClock};
use crate::login_item::{LoginItemRegistrar, NoopLoginItem};
use crate::sync::Poller;

const EVENT_CAPACITY: usize = 64;

/// Fresh records for one database, published after each successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEvent {
    pub kind: DatabaseKind,
    pub key: String,
    pub records: Vec<Record>,
}

pub struct SyncEngine {
    config: ConfigCell,
    config_store: Arc<dyn ConfigStore>,
    token_store: Arc<dyn TokenStore>,
    notion: Arc<dyn NotionApi>,
    cache: SnapshotCache,
    clock: Arc<dyn Clock>,
    login_item: Arc<dyn LoginItemRegistrar>,
    /// Serializes save_config so the login-item diff sees a stable baseline
    save_lock: tokio::sync::Mutex<()>,
    /// At most one refresh_all pass at a time
    refresh_lock: tokio::sync::Mutex<()>,
    poller: Mutex<Option<Poller>>,
    shutdown: CancellationToken,
    events: broadcast::Sender<SnapshotEvent>,
}

impl SyncEngine {
    /// Starts with the built-in default configuration; call `load_config`
    /// to install the stored one.
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        token_store: Arc<dyn TokenStore>,
        notion: Arc<dyn NotionApi>,
    ) -> Self {
        Self {
            config: ConfigCell::new(Config::default().normalize()),
            config_store,
            token_store,
            notion,
            cache: SnapshotCache::new(),
            clock: Arc::new(SystemClock),
            login_item: Arc::new(NoopLoginItem),
            save_lock: tokio::sync::Mutex::new(()),
            refresh_lock: tokio::sync::Mutex::new(()),
            poller: Mutex::new(None),
            shutdown: CancellationToken::new(),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_login_item_registrar(mut self, registrar: Arc<dyn LoginItemRegistrar>) -> Self {
        self.login_item = registrar;
        self
    }

    /// Polling stops when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotEvent> {
        self.events.subscribe()
    }

    pub fn snapshot_stream(&self) -> BroadcastStream<SnapshotEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    fn publish(&self, kind: DatabaseKind, key: &str, records: &[Record]) {
        // No receivers is fine.
        let _ = self.events.send(SnapshotEvent {
            kind,
            key: key.to_string(),
            records: records.to_vec(),
        });
    }

    /// Caches and publishes a fetch result. Returns false when the cache was
    /// invalidated after `since`; the records are then stale and dropped.
    async fn store_snapshot(
        &self,
        kind: DatabaseKind,
        key: &str,
        records: &[Record],
        since: Generation,
    ) -> bool {
        if !self.cache.set(kind, key, records, since).await {
            debug!("[SyncEngine] Dropped stale {} snapshot for {}", kind, key);
            return false;
        }
        self.publish(kind, key, records);
        true
    }

    // ===== Configuration =====

    /// Loads, normalizes and installs the stored configuration.
    pub async fn load_config(&self) -> Result<Config> {
        let config = self.config_store.load().await?.normalize();
        self.install(config.clone()).await;
        info!(
            "[SyncEngine] Loaded config with {} database(s)",
            config.databases.len()
        );
        Ok(config)
    }

    /// Swaps in `config`; cached snapshots are dropped if it differs.
    async fn install(&self, config: Config) {
        let next = config.clone();
        let previous = self.config.replace(config).await;
        if *previous != next {
            self.cache.clear().await;
        }
    }

    /// A copy of the installed configuration.
    pub async fn config(&self) -> Config {
        self.config.snapshot().await.as_ref().clone()
    }

    /// Normalizes, registers the login item if that toggle changed, then
    /// persists and installs `config`. Returns what was installed.
    ///
    /// Nothing is persisted when login-item registration fails.
    pub async fn save_config(&self, config: Config) -> Result<Config> {
        let _guard = self.save_lock.lock().await;
        let config = config.normalize();
        let previous = self.config.snapshot().await;

        if previous.launch_at_login != config.launch_at_login {
            self.login_item.set_enabled(config.launch_at_login).await?;
        }
        self.config_store.save(&config).await?;
        self.install(config.clone()).await;

        info!(
            "[SyncEngine] Saved config with {} database(s)",
            config.databases.len()
        );
        Ok(config)
    }

    // ===== Token =====

    pub async fn get_token(&self) -> Result<String> {
        self.token_store.get_token().await
    }

    pub async fn set_token(&self, token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(SyncError::invalid("token is empty"));
        }
        self.token_store.set_token(token).await
    }

    pub async fn clear_token(&self) -> Result<()> {
        self.token_store.clear_token().await
    }

    /// Whether a non-empty token is stored.
    pub async fn token_status(&self) -> Result<bool> {
        match self.token_store.get_token().await {
            Ok(token) => Ok(!token.trim().is_empty()),
            Err(SyncError::Auth(AuthError::TokenNotFound)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ===== Schema Resolution =====

    pub async fn resolve_data_source_id(&self, database_id: &str) -> Result<String> {
        let database_id = database_id.trim();
        if database_id.is_empty() {
            return Err(SyncError::missing("database_id"));
        }
        let config = self.config.snapshot().await;
        self.notion
            .resolve_data_source_id(database_id, &config.notion_version)
            .await
    }

    pub async fn resolve_title_property_name(&self, database_id: &str) -> Result<String> {
        let database_id = database_id.trim();
        if database_id.is_empty() {
            return Err(SyncError::missing("database_id"));
        }
        let config = self.config.snapshot().await;
        self.notion
            .resolve_title_property_name(database_id, &config.notion_version)
            .await
    }

    /// Fills in a habit database's data source and title property from
    /// Notion when they are blank. The result is only used for this call
    /// and is never written back to the configuration.
    async fn ensure_habit_schema(
        &self,
        db: &DatabaseConfig,
        api_version: &str,
    ) -> Result<DatabaseConfig> {
        let mut db = db.clone();
        if db.data_source_id.trim().is_empty() {
            if db.database_id.trim().is_empty() {
                return Err(SyncError::missing("database_id"));
            }
            db.data_source_id = self
                .notion
                .resolve_data_source_id(&db.database_id, api_version)
                .await?;
            debug!(
                "[SyncEngine] Resolved data source {} for {}",
                db.data_source_id, db.key
            );
        }
        if db.title_property_name.trim().is_empty() {
            if db.database_id.trim().is_empty() {
                return Err(SyncError::missing("database_id"));
            }
            db.title_property_name = self
                .notion
                .resolve_title_property_name(&db.database_id, api_version)
                .await?;
        }
        Ok(db)
    }

    // ===== Tasks =====

    async fn fetch_tasks(&self, config: &Config, key: &str) -> Result<(String, Vec<Record>)> {
        let db = resolve_database(config, key, DatabaseKind::Task)?;
        require_kind(db, DatabaseKind::Task)?;
        let tasks = self
            .notion
            .query_by_status(
                db,
                &config.notion_version,
                config.max_results,
                &db.status_in_progress,
            )
            .await?;
        Ok((db.key.clone(), tasks))
    }

    /// In-progress tasks straight from Notion. Does not touch the cache.
    pub async fn query_tasks(&self, key: &str) -> Result<Vec<Record>> {
        let config = self.config.snapshot().await;
        Ok(self.fetch_tasks(&config, key).await?.1)
    }

    /// Cached tasks for `key`, fetched on first use or when `force` is set.
    pub async fn get_tasks(&self, key: &str, force: bool) -> Result<Vec<Record>> {
        // Taken before the config snapshot so a concurrent save invalidates it.
        let since = self.cache.generation(DatabaseKind::Task).await;
        let config = self.config.snapshot().await;
        if !force {
            let db = resolve_database(&config, key, DatabaseKind::Task)?;
            require_kind(db, DatabaseKind::Task)?;
            if let Some(cached) = self.cache.get(DatabaseKind::Task, &db.key).await {
                debug!("[SyncEngine] Task cache hit for {}", db.key);
                return Ok(cached);
            }
        }
        let (resolved, tasks) = self.fetch_tasks(&config, key).await?;
        self.store_snapshot(DatabaseKind::Task, &resolved, &tasks, since)
            .await;
        Ok(tasks)
    }

    /// Moves a task to the status mapped from `action` (`done`, `pause`,
    /// `resume`, ...).
    pub async fn update_task_status(&self, key: &str, task_id: &str, action: &str) -> Result<()> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(SyncError::missing("task_id"));
        }
        let config = self.config.snapshot().await;
        let db = resolve_database(&config, key, DatabaseKind::Task)?;
        require_kind(db, DatabaseKind::Task)?;
        let status = db
            .status_for_action(action)
            .ok_or_else(|| ConfigStateError::StatusNotConfigured {
                action: action.trim().to_string(),
            })?;

        self.notion
            .update_status(task_id, db, &config.notion_version, status)
            .await?;
        self.cache.remove(DatabaseKind::Task, &db.key).await;
        info!(
            "[SyncEngine] Task {} in {} set to '{}' ({})",
            task_id, db.key, status, action
        );
        Ok(())
    }

    // ===== Habits =====

    async fn fetch_habits(&self, config: &Config, key: &str) -> Result<(String, Vec<Record>)> {
        let db = resolve_database(config, key, DatabaseKind::Habit)?;
        require_kind(db, DatabaseKind::Habit)?;
        let db = self.ensure_habit_schema(db, &config.notion_version).await?;
        let checkbox = habit_checkbox_property(&db, self.clock.weekday_from_sunday())?;

        let habits = self
            .notion
            .query_habits_today(&db, &checkbox, &config.notion_version, config.max_results)
            .await?;
        let habits = filter_unchecked(unique_by_title(habits));
        debug!(
            "[SyncEngine] {} habit(s) left today in {} (column {})",
            habits.len(),
            db.key,
            checkbox
        );
        Ok((db.key, habits))
    }

    /// Habits not yet ticked for today, deduplicated by title. Does not
    /// touch the cache.
    pub async fn query_habits(&self, key: &str) -> Result<Vec<Record>> {
        let config = self.config.snapshot().await;
        Ok(self.fetch_habits(&config, key).await?.1)
    }

    pub async fn get_habits(&self, key: &str, force: bool) -> Result<Vec<Record>> {
        let since = self.cache.generation(DatabaseKind::Habit).await;
        let config = self.config.snapshot().await;
        if !force {
            let db = resolve_database(&config, key, DatabaseKind::Habit)?;
            require_kind(db, DatabaseKind::Habit)?;
            if let Some(cached) = self.cache.get(DatabaseKind::Habit, &db.key).await {
                debug!("[SyncEngine] Habit cache hit for {}", db.key);
                return Ok(cached);
            }
        }
        let (resolved, habits) = self.fetch_habits(&config, key).await?;
        self.store_snapshot(DatabaseKind::Habit, &resolved, &habits, since)
            .await;
        Ok(habits)
    }

    /// Ticks or unticks today's checkbox on a habit page.
    pub async fn update_habit_check(&self, key: &str, task_id: &str, checked: bool) -> Result<()> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(SyncError::missing("task_id"));
        }
        let config = self.config.snapshot().await;
        let db = resolve_database(&config, key, DatabaseKind::Habit)?;
        require_kind(db, DatabaseKind::Habit)?;
        let db = self.ensure_habit_schema(db, &config.notion_version).await?;
        let checkbox = habit_checkbox_property(&db, self.clock.weekday_from_sunday())?;

        self.notion
            .update_checkbox(task_id, &db, &checkbox, &config.notion_version, checked)
            .await?;
        self.cache.remove(DatabaseKind::Habit, &db.key).await;
        info!(
            "[SyncEngine] Habit {} in {} column {} set to {}",
            task_id, db.key, checkbox, checked
        );
        Ok(())
    }

    // ===== Refresh & Polling =====

    /// Refreshes every enabled database into the cache.
    ///
    /// A failing database does not stop the pass; the first error seen is
    /// returned after all databases were tried. Concurrent calls queue on
    /// the refresh lock.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_all(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        let tasks_since = self.cache.generation(DatabaseKind::Task).await;
        let habits_since = self.cache.generation(DatabaseKind::Habit).await;
        let config = self.config.snapshot().await;

        let mut first_error: Option<SyncError> = None;
        let mut refreshed = 0usize;
        for db in config.enabled_databases() {
            let (result, since) = match db.kind {
                DatabaseKind::Task => (self.fetch_tasks(&config, &db.key).await, tasks_since),
                DatabaseKind::Habit => (self.fetch_habits(&config, &db.key).await, habits_since),
            };
            match result {
                Ok((key, records)) => {
                    if self.store_snapshot(db.kind, &key, &records, since).await {
                        refreshed += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        key = %db.key,
                        kind = e.kind(),
                        "[SyncEngine] Refresh of {} failed: {}",
                        db.key,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        info!("[SyncEngine] Refreshed {} database(s)", refreshed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn poller_slot(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replaces any running poller with one using the current poll interval
    /// and runs one refresh right away in the background.
    pub async fn start_polling(self: &Arc<Self>) {
        let interval = self.config.snapshot().await.poll_interval();
        self.stop_polling();
        let poller = Poller::new(interval);

        let weak = Arc::downgrade(self);
        poller.start(&self.shutdown, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(engine) => engine.refresh_all().await,
                    None => Ok(()),
                }
            }
        });

        if let Some(previous) = self.poller_slot().replace(poller) {
            previous.stop();
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(engine) = weak.upgrade() {
                if let Err(e) = engine.refresh_all().await {
                    warn!(error = %e, "[SyncEngine] Initial refresh failed");
                }
            }
        });
    }

    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller_slot().take() {
            poller.stop();
            info!("[SyncEngine] Polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller_slot()
            .as_ref()
            .map(Poller::is_running)
            .unwrap_or(false)
    }

    /// Stops polling for good; later `start_polling` calls spawn loops that
    /// exit immediately.
    pub fn shutdown(&self) {
        self.stop_polling();
        self.shutdown.cancel();
    }
}
