//! Settings persistence
//!
//! `FileConfigStore` keeps the settings as pretty-printed JSON under the
//! user's config directory. `MemoryConfigStore` is for tests and
//! `--ephemeral` runs.

use async_trait::async_trait;
use nudge_api::{Config, ConfigStore, Result, SyncError};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const APP_NAME: &str = "nudge";
const CONFIG_FILE: &str = "config.json";

pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<user config dir>/nudge/config.json`
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| SyncError::store("user config dir is not available"))?;
        Ok(Self::new(base.join(APP_NAME).join(CONFIG_FILE)))
    }

    async fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| SyncError::store(format!("write config: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| SyncError::store(format!("chmod config: {}", e)))?;
        }

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SyncError::store(format!("replace config: {}", e)))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<Config> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "[FileConfigStore] No config at {}, using defaults",
                    self.path.display()
                );
                return Ok(Config::default());
            }
            Err(e) => return Err(SyncError::store(format!("read config: {}", e))),
        };
        serde_json::from_str(&text).map_err(|e| SyncError::store(format!("parse config: {}", e)))
    }

    async fn save(&self, config: &Config) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| SyncError::store(format!("mkdir config dir: {}", e)))?;
        }
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| SyncError::store(format!("marshal config: {}", e)))?;
        Self::write_atomically(&self.path, &json).await?;
        info!("[FileConfigStore] Saved config to {}", self.path.display());
        Ok(())
    }

    fn path(&self) -> Result<PathBuf> {
        Ok(self.path.clone())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    config: RwLock<Option<Config>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config: RwLock::new(Some(config)),
        }
    }

    /// What was last saved, if anything.
    pub async fn saved(&self) -> Option<Config> {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Config> {
        Ok(self.config.read().await.clone().unwrap_or_default())
    }

    async fn save(&self, config: &Config) -> Result<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }

    fn path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(":memory:"))
    }
}
