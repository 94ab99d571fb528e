//! Start-at-login registration
//!
//! On macOS the item is managed through System Events with `osascript`.
//! Other platforms have no registrar and only log the request.

use async_trait::async_trait;
use nudge_api::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const LOGIN_ITEM_NAME: &str = "Nudge";

#[async_trait]
pub trait LoginItemRegistrar: Send + Sync {
    async fn set_enabled(&self, enabled: bool) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NoopLoginItem;

#[async_trait]
impl LoginItemRegistrar for NoopLoginItem {
    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        info!(
            "[LoginItem] Login items are not supported on this platform (requested enabled={})",
            enabled
        );
        Ok(())
    }
}

/// Registers a login item by name and path via System Events.
pub struct OsascriptLoginItem {
    name: String,
    path: PathBuf,
}

impl OsascriptLoginItem {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Item for the running executable, or its enclosing `.app` bundle.
    pub fn for_current_exe(name: impl Into<String>) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| SyncError::LoginItem {
            message: format!("executable path: {}", e),
        })?;
        let exe = std::fs::canonicalize(&exe).unwrap_or(exe);
        let path = app_bundle_path(&exe).unwrap_or(exe);
        Ok(Self::new(name, path))
    }
}

#[async_trait]
impl LoginItemRegistrar for OsascriptLoginItem {
    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let script = login_item_script(&self.name, &self.path.to_string_lossy(), enabled);
        let output = tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .output()
            .await
            .map_err(|e| SyncError::LoginItem {
                message: format!("run osascript: {}", e),
            })?;

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(SyncError::LoginItem {
                message: format!("osascript exited with {}: {}", output.status, detail),
            });
        }
        info!(
            "[LoginItem] {} login item for {}",
            if enabled { "Registered" } else { "Removed" },
            self.path.display()
        );
        Ok(())
    }
}

/// The registrar for the host OS.
pub fn platform_registrar() -> Arc<dyn LoginItemRegistrar> {
    if cfg!(target_os = "macos") {
        match OsascriptLoginItem::for_current_exe(LOGIN_ITEM_NAME) {
            Ok(item) => return Arc::new(item),
            Err(e) => info!("[LoginItem] Falling back to no-op registrar: {}", e),
        }
    }
    Arc::new(NoopLoginItem)
}

/// `/Applications/Nudge.app/Contents/MacOS/nudge` -> `/Applications/Nudge.app`
fn app_bundle_path(exe: &Path) -> Option<PathBuf> {
    exe.ancestors()
        .find(|p| p.extension().map(|ext| ext == "app").unwrap_or(false))
        .map(Path::to_path_buf)
}

fn applescript_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// AppleScript that adds or removes the login item.
///
/// Enabling updates an existing item of the same name in place. Disabling
/// removes the named item and any other item pointing at the same path.
pub fn login_item_script(name: &str, path: &str, enabled: bool) -> String {
    let name = applescript_string(name);
    let path = applescript_string(path);
    if enabled {
        format!(
            r#"tell application "System Events"
  set loginItemName to "{name}"
  set loginItemPath to "{path}"
  if (exists login item loginItemName) then
    set path of login item loginItemName to loginItemPath
    set hidden of login item loginItemName to false
  else
    make login item at end with properties {{name:loginItemName, path:loginItemPath, hidden:false}}
  end if
end tell"#
        )
    } else {
        format!(
            r#"tell application "System Events"
  set loginItemName to "{name}"
  set loginItemPath to "{path}"
  if (exists login item loginItemName) then
    delete login item loginItemName
  end if
  repeat with li in (every login item whose path is loginItemPath)
    delete li
  end repeat
end tell"#
        )
    }
}
