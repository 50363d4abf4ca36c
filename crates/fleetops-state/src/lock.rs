//! Lock backends guarding a state file across processes

use crate::error::{Result, StateError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use uuid::Uuid;

/// Locks older than this are considered abandoned
const STALE_AFTER_HOURS: i64 = 1;

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Backend name as used in settings (e.g. "file")
    fn name(&self) -> &str;

    /// Acquire the lock. Exclusive locks conflict with any holder, shared
    /// locks only with an exclusive holder.
    async fn lock(&self, description: &str, exclusive: bool) -> Result<()>;

    async fn unlock(&self) -> Result<()>;

    /// Best-effort synchronous release used when a guard is dropped
    fn unlock_blocking(&self) {}
}

/// RAII guard returned by [`acquire`]
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    released: bool,
}

/// Acquire `backend` and wrap it in a guard released on drop
pub async fn acquire(
    backend: Arc<dyn LockBackend>,
    description: &str,
    exclusive: bool,
) -> Result<LockGuard> {
    backend.lock(description, exclusive).await?;
    Ok(LockGuard {
        backend,
        released: false,
    })
}

impl LockGuard {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.unlock().await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.backend.unlock_blocking();
        }
    }
}

/// No locking at all
#[derive(Debug, Default, Clone)]
pub struct NoLock;

#[async_trait]
impl LockBackend for NoLock {
    fn name(&self) -> &str {
        "none"
    }

    async fn lock(&self, _description: &str, _exclusive: bool) -> Result<()> {
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        Ok(())
    }
}

/// One holder recorded in the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    token: String,
    holder: String,
    description: String,
    exclusive: bool,
    acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LockFileContent {
    holders: Vec<LockInfo>,
}

/// Lock file next to the state file, listing every current holder
pub struct FileLock {
    lock_path: PathBuf,
    token: Mutex<Option<String>>,
}

impl FileLock {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            token: Mutex::new(None),
        }
    }

    /// Lock file used for the state file at `state_path`
    pub fn for_state_file(state_path: &Path) -> Self {
        let mut name = state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        Self::new(state_path.with_file_name(name))
    }

    async fn read(&self) -> Result<LockFileContent> {
        if !self.lock_path.exists() {
            return Ok(LockFileContent::default());
        }
        let content = fs::read_to_string(&self.lock_path)
            .await
            .map_err(|e| StateError::io(&self.lock_path, e))?;
        if content.trim().is_empty() {
            return Ok(LockFileContent::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn write(&self, content: &LockFileContent) -> Result<()> {
        if content.holders.is_empty() {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path)
                    .await
                    .map_err(|e| StateError::io(&self.lock_path, e))?;
            }
            return Ok(());
        }
        if let Some(parent) = self.lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(content)?;
        fs::write(&self.lock_path, json)
            .await
            .map_err(|e| StateError::io(&self.lock_path, e))
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn holder_name() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

#[async_trait]
impl LockBackend for FileLock {
    fn name(&self) -> &str {
        "file"
    }

    async fn lock(&self, description: &str, exclusive: bool) -> Result<()> {
        let mut content = self.read().await?;

        let now = Utc::now();
        content.holders.retain(|h| {
            let stale = now.signed_duration_since(h.acquired_at).num_hours() >= STALE_AFTER_HOURS;
            if stale {
                tracing::warn!("Removing stale lock held by {}", h.holder);
            }
            !stale
        });

        if let Some(conflict) = content
            .holders
            .iter()
            .find(|h| h.exclusive || exclusive)
        {
            return Err(StateError::Locked {
                holder: format!("{} ({})", conflict.holder, conflict.description),
                since: conflict.acquired_at.to_rfc3339(),
            });
        }

        let token = Uuid::new_v4().to_string();
        content.holders.push(LockInfo {
            token: token.clone(),
            holder: holder_name(),
            description: description.to_string(),
            exclusive,
            acquired_at: now,
        });
        self.write(&content).await?;

        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        tracing::debug!(exclusive, "Acquired state lock: {}", description);
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        let Some(token) = self.current_token() else {
            return Ok(());
        };
        let mut content = self.read().await?;
        content.holders.retain(|h| h.token != token);
        self.write(&content).await?;
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        tracing::debug!("Released state lock");
        Ok(())
    }

    fn unlock_blocking(&self) {
        let Some(token) = self.current_token() else {
            return;
        };
        let Ok(raw) = std::fs::read_to_string(&self.lock_path) else {
            return;
        };
        let Ok(mut content) = serde_json::from_str::<LockFileContent>(&raw) else {
            return;
        };
        content.holders.retain(|h| h.token != token);
        let _ = if content.holders.is_empty() {
            std::fs::remove_file(&self.lock_path)
        } else {
            serde_json::to_string_pretty(&content)
                .map_err(std::io::Error::other)
                .and_then(|json| std::fs::write(&self.lock_path, json))
        };
    }
}
