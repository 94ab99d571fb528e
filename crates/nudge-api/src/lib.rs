//! Shared types for nudge
//!
//! This crate holds the values every other nudge crate passes around:
//! - `Record` - a task or habit page mirrored from Notion
//! - `config` - the multi-database configuration model and its normalization
//! - `store` - the `TokenStore` / `ConfigStore` collaborator traits
//! - `SyncError` - the error taxonomy surfaced to callers

pub mod config;
pub mod store;

pub use config::{
    Config, DatabaseConfig, DatabaseKind, StatusPropertyType, DEFAULT_HABIT_DAYS,
    DEFAULT_HABIT_TITLE_PROPERTY, DEFAULT_NOTION_VERSION,
};
pub use store::{ConfigStore, TokenStore};

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, SyncError>;

/// A task or habit page as handed to callers.
///
/// Produced only by the remote client's mapping step. `checked` is only
/// meaningful for habits; tasks always carry `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub url: String,
    pub status: String,
    pub last_edited_time: String,
    #[serde(default)]
    pub checked: bool,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Credential failures. Never retried; the UI prompts for a new token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("notion token is not set")]
    TokenNotFound,

    #[error("notion token is empty")]
    TokenEmpty,
}

/// The resolved configuration cannot serve the requested operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigStateError {
    #[error("{kind} database is not configured")]
    NotConfigured { kind: DatabaseKind },

    #[error("database not found: {key}")]
    NotFound { key: String },

    #[error("database is disabled: {key}")]
    Disabled { key: String },

    #[error("database kind is not {expected}: {key}")]
    WrongKind { key: String, expected: DatabaseKind },

    #[error("no data_sources found in database")]
    NoDataSource,

    #[error("multiple data_sources found ({count}); only one is supported")]
    MultipleDataSources { count: usize },

    #[error("title property not found")]
    TitlePropertyNotFound,

    #[error("status is not configured for action '{action}'")]
    StatusNotConfigured { action: String },
}

/// Structured error type for every nudge operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("{message}")]
    Validation { message: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(
        "notion transient error{}: {}",
        .status.map(|s| format!(" (status={s})")).unwrap_or_default(),
        .message
    )]
    Transient { status: Option<u16>, message: String },

    #[error("notion error: status={status} body={body}")]
    Permanent { status: u16, body: String },

    #[error(transparent)]
    ConfigState(#[from] ConfigStateError),

    #[error("decode response: {message}")]
    Decode { message: String },

    #[error("store error: {message}")]
    Store { message: String },

    #[error("login item: {message}")]
    LoginItem { message: String },
}

impl SyncError {
    /// `"<field> is required"`
    pub fn missing(field: &str) -> Self {
        SyncError::Validation {
            message: format!("{} is required", field),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        SyncError::Validation {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        SyncError::Store {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Stable code for frontends to branch on.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation { .. } => "validation",
            SyncError::Auth(_) => "auth",
            SyncError::Transient { .. } => "transient_remote",
            SyncError::Permanent { .. } => "permanent_remote",
            SyncError::ConfigState(_) => "config_state",
            SyncError::Decode { .. } => "decode",
            SyncError::Store { .. } => "store",
            SyncError::LoginItem { .. } => "login_item",
        }
    }
}
