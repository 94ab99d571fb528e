//! Collaborator traits for secret and settings persistence
//!
//! Concrete implementations (keychain, JSON file, in-memory) live in the
//! `nudge` crate; the remote client only needs `TokenStore`.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::{Config, Result};

/// Bearer credential storage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fails with `AuthError::TokenNotFound` when no token was ever stored.
    async fn get_token(&self) -> Result<String>;

    /// Rejects an empty token.
    async fn set_token(&self, token: &str) -> Result<()>;

    /// Removing a token that does not exist succeeds.
    async fn clear_token(&self) -> Result<()>;
}

/// Settings persistence.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns `Config::default()` when nothing was saved yet.
    async fn load(&self) -> Result<Config>;

    async fn save(&self, config: &Config) -> Result<()>;

    fn path(&self) -> Result<PathBuf>;
}
