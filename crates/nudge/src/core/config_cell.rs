use nudge_api::Config;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The installed configuration.
///
/// Readers get an `Arc` snapshot that never changes underneath them; `replace`
/// swaps in a whole new value.
pub struct ConfigCell {
    inner: RwLock<Arc<Config>>,
}

impl ConfigCell {
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    pub async fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Installs `config` and returns the previous snapshot.
    pub async fn replace(&self, config: Config) -> Arc<Config> {
        let mut inner = self.inner.write().await;
        std::mem::replace(&mut *inner, Arc::new(config))
    }
}
