//! Notion integration token storage

use async_trait::async_trait;
use nudge_api::{AuthError, Result, SyncError, TokenStore};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const KEYRING_SERVICE: &str = "nudge";
pub const KEYRING_ACCOUNT: &str = "notion";

/// Token kept in the OS credential store (Keychain, Credential Manager,
/// kernel keyutils).
pub struct KeyringTokenStore {
    service: String,
    account: String,
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(service, account)
            .map_err(|e| SyncError::store(format!("Failed to create keyring entry: {e}")))
    }

    /// keyring calls block; run them off the async workers.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(String, String) -> Result<T> + Send + 'static,
    {
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || f(service, account))
            .await
            .map_err(|e| SyncError::store(format!("keyring task failed: {e}")))?
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn get_token(&self) -> Result<String> {
        self.blocking(|service, account| {
            match Self::entry(&service, &account)?.get_password() {
                Ok(token) => Ok(token.trim().to_string()),
                Err(keyring::Error::NoEntry) => Err(AuthError::TokenNotFound.into()),
                Err(e) => Err(SyncError::store(format!("Failed to retrieve token: {e}"))),
            }
        })
        .await
    }

    async fn set_token(&self, token: &str) -> Result<()> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(SyncError::invalid("token is empty"));
        }
        self.blocking(move |service, account| {
            Self::entry(&service, &account)?
                .set_password(&token)
                .map_err(|e| SyncError::store(format!("Failed to store token: {e}")))
        })
        .await?;
        info!("[KeyringTokenStore] Token stored");
        Ok(())
    }

    async fn clear_token(&self) -> Result<()> {
        self.blocking(|service, account| {
            match Self::entry(&service, &account)?.delete_credential() {
                Ok(()) => Ok(()),
                Err(keyring::Error::NoEntry) => {
                    debug!("[KeyringTokenStore] No token to clear");
                    Ok(())
                }
                Err(e) => Err(SyncError::store(format!("Failed to delete token: {e}"))),
            }
        })
        .await?;
        info!("[KeyringTokenStore] Token cleared");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_token(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or(SyncError::Auth(AuthError::TokenNotFound))
    }

    async fn set_token(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::invalid("token is empty"));
        }
        *self.token.write().await = Some(token.to_string());
        Ok(())
    }

    async fn clear_token(&self) -> Result<()> {
        *self.token.write().await = None;
        Ok(())
    }
}
