//! Multi-database configuration model
//!
//! A `Config` lists one or more Notion databases, each playing the role of a
//! task list or a habit tracker. `Config::normalize` is run on every load and
//! save so the rest of the system can rely on unique, non-blank keys and on
//! habit entries always having a title and checkbox specification.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::{Result, SyncError};

/// First API version exposing data sources.
pub const DEFAULT_NOTION_VERSION: &str = "2025-09-03";

/// Sunday-first weekday checkbox columns.
pub const DEFAULT_HABIT_DAYS: &str = "日,月,火,水,木,金,土";

pub const DEFAULT_HABIT_TITLE_PROPERTY: &str = "名前";

pub const DEFAULT_POLL_INTERVAL_SECONDS: i64 = 60;

pub const DEFAULT_MAX_RESULTS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Task,
    Habit,
}

impl DatabaseKind {
    /// Anything other than `habit` (including blank) is a task database.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("habit") {
            DatabaseKind::Habit
        } else {
            DatabaseKind::Task
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Task => "task",
            DatabaseKind::Habit => "habit",
        }
    }

    fn default_name(&self) -> &'static str {
        match self {
            DatabaseKind::Task => "Tasks",
            DatabaseKind::Habit => "Habits",
        }
    }

    fn default_key(&self) -> &'static str {
        match self {
            DatabaseKind::Task => "tasks",
            DatabaseKind::Habit => "habits",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DatabaseKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|s| DatabaseKind::parse(&s)).unwrap_or_default())
    }
}

/// How the remote status-like property is typed. The two kinds need
/// different filter and update payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPropertyType {
    Status,
    Select,
}

impl StatusPropertyType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "status" => Some(StatusPropertyType::Status),
            "select" => Some(StatusPropertyType::Select),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPropertyType::Status => "status",
            StatusPropertyType::Select => "select",
        }
    }
}

/// One configured Notion database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub key: String,
    pub name: String,
    pub kind: DatabaseKind,
    pub enabled: bool,
    pub database_id: String,
    pub data_source_id: String,
    pub title_property_name: String,
    pub status_property_name: String,
    /// `"status"` or `"select"`; kept as text because it comes from a
    /// hand-editable file and is validated at query time.
    pub status_property_type: String,
    pub status_in_progress: String,
    pub status_done: String,
    pub status_paused: String,
    /// Either one property name, or seven comma-separated names indexed by
    /// weekday (Sunday first).
    pub checkbox_property_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            name: String::new(),
            kind: DatabaseKind::Task,
            enabled: true,
            database_id: String::new(),
            data_source_id: String::new(),
            title_property_name: String::new(),
            status_property_name: String::new(),
            status_property_type: StatusPropertyType::Status.as_str().to_string(),
            status_in_progress: String::new(),
            status_done: String::new(),
            status_paused: String::new(),
            checkbox_property_name: String::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn new(key: impl Into<String>, kind: DatabaseKind) -> Self {
        let mut db = Self {
            key: key.into(),
            kind,
            ..Self::default()
        };
        db.normalize_fields();
        db
    }

    /// Maps a UI action to this database's status vocabulary.
    ///
    /// Returns `None` for unknown actions and for actions whose value is not
    /// configured.
    pub fn status_for_action(&self, action: &str) -> Option<&str> {
        let value = match action.trim() {
            "done" => &self.status_done,
            "paused" | "pause" => &self.status_paused,
            "resume" | "in_progress" => &self.status_in_progress,
            _ => return None,
        };
        if value.is_empty() {
            None
        } else {
            Some(value.as_str())
        }
    }

    pub fn validate_for_status_query(
        &self,
        status_value: &str,
        api_version: &str,
    ) -> Result<StatusPropertyType> {
        if self.data_source_id.is_empty() {
            return Err(SyncError::missing("data_source_id"));
        }
        if self.title_property_name.is_empty() {
            return Err(SyncError::missing("title_property_name"));
        }
        if self.status_property_name.is_empty() {
            return Err(SyncError::missing("status_property_name"));
        }
        if status_value.is_empty() {
            return Err(SyncError::missing("status value"));
        }
        if api_version.is_empty() {
            return Err(SyncError::missing("notion_version"));
        }
        StatusPropertyType::parse(&self.status_property_type).ok_or_else(|| {
            SyncError::invalid("status_property_type must be 'status' or 'select'")
        })
    }

    pub fn validate_for_query(&self, api_version: &str) -> Result<StatusPropertyType> {
        self.validate_for_status_query(&self.status_in_progress, api_version)
    }

    pub fn validate_for_update(
        &self,
        status_value: &str,
        api_version: &str,
    ) -> Result<StatusPropertyType> {
        let status_type = self.validate_for_query(api_version)?;
        if self.status_done.is_empty() {
            return Err(SyncError::missing("status_done"));
        }
        if self.status_paused.is_empty() {
            return Err(SyncError::missing("status_paused"));
        }
        if status_value.is_empty() {
            return Err(SyncError::missing("status value"));
        }
        Ok(status_type)
    }

    pub fn validate_for_habit_query(&self, checkbox_property: &str, api_version: &str) -> Result<()> {
        if self.data_source_id.is_empty() {
            return Err(SyncError::missing("data_source_id"));
        }
        if self.title_property_name.is_empty() {
            return Err(SyncError::missing("title_property_name"));
        }
        if checkbox_property.trim().is_empty() {
            return Err(SyncError::missing("checkbox_property_name"));
        }
        if api_version.is_empty() {
            return Err(SyncError::missing("notion_version"));
        }
        Ok(())
    }

    fn normalize_fields(&mut self) {
        self.key = self.key.trim().to_string();
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = self.kind.default_name().to_string();
        }
        self.status_property_type = self.status_property_type.trim().to_string();
        if self.status_property_type.is_empty() {
            self.status_property_type = StatusPropertyType::Status.as_str().to_string();
        }
        if self.kind == DatabaseKind::Habit {
            if self.title_property_name.trim().is_empty() {
                self.title_property_name = DEFAULT_HABIT_TITLE_PROPERTY.to_string();
            }
            if self.checkbox_property_name.trim().is_empty() {
                self.checkbox_property_name = DEFAULT_HABIT_DAYS.to_string();
            }
        }
    }
}

/// The whole settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub databases: Vec<DatabaseConfig>,
    pub poll_interval_seconds: i64,
    /// Page-size cap for queries; `0` means the API default.
    pub max_results: u32,
    pub launch_at_login: bool,
    pub tray_icon_path: String,
    pub notion_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            databases: Vec::new(),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            max_results: DEFAULT_MAX_RESULTS,
            launch_at_login: false,
            tray_icon_path: String::new(),
            notion_version: DEFAULT_NOTION_VERSION.to_string(),
        }
    }
}

impl Config {
    /// Installs defaults and makes keys unique.
    ///
    /// Normalizing an already normalized config returns it unchanged.
    pub fn normalize(mut self) -> Self {
        if self.poll_interval_seconds <= 0 {
            self.poll_interval_seconds = DEFAULT_POLL_INTERVAL_SECONDS;
        }
        self.notion_version = self.notion_version.trim().to_string();
        if self.notion_version.is_empty() {
            self.notion_version = DEFAULT_NOTION_VERSION.to_string();
        }

        if self.databases.is_empty() {
            self.databases = default_databases();
            return self;
        }

        let mut seen: HashSet<String> = HashSet::with_capacity(self.databases.len());
        for (index, db) in self.databases.iter_mut().enumerate() {
            db.normalize_fields();
            let ordinal = index + 1;
            let base = if db.key.is_empty() {
                format!("{}-{}", db.kind.default_key(), ordinal)
            } else {
                db.key.clone()
            };
            let mut key = base.clone();
            let mut suffix = ordinal;
            while seen.contains(&key) {
                key = format!("{}-{}", base, suffix);
                suffix += 1;
            }
            seen.insert(key.clone());
            db.key = key;
        }
        self
    }

    pub fn first_database_by_kind(&self, kind: DatabaseKind) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.kind == kind)
    }

    pub fn database_by_key(&self, key: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.key == key)
    }

    pub fn enabled_databases(&self) -> impl Iterator<Item = &DatabaseConfig> {
        self.databases.iter().filter(|db| db.enabled)
    }

    pub fn poll_interval(&self) -> Duration {
        if self.poll_interval_seconds <= 0 {
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS as u64)
        } else {
            Duration::from_secs(self.poll_interval_seconds as u64)
        }
    }
}

fn default_databases() -> Vec<DatabaseConfig> {
    vec![
        DatabaseConfig::new(DatabaseKind::Task.default_key(), DatabaseKind::Task),
        DatabaseConfig::new(DatabaseKind::Habit.default_key(), DatabaseKind::Habit),
    ]
}
