//! Storage backends
//!
//! The store always works on a local materialized copy of the state file.
//! A storage backend fetches that copy before the store opens it and uploads
//! it again after each commit.

use crate::document::StateDocument;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name as used in settings (e.g. "local")
    fn name(&self) -> &str;

    /// Materialize the remote state at `path`
    async fn fetch_to_file(&self, path: &Path) -> Result<()>;

    /// Push the local copy at `path` back to the remote
    async fn upload_from_file(&self, path: &Path) -> Result<()>;

    /// Called once the document has been read
    async fn on_open(&self, _state: &StateDocument) -> Result<()> {
        Ok(())
    }
}

/// The state file lives on the local filesystem; nothing to transfer
#[derive(Debug, Default, Clone)]
pub struct LocalStorage;

#[async_trait]
impl StorageBackend for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch_to_file(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "local storage: nothing to fetch");
        Ok(())
    }

    async fn upload_from_file(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "local storage: nothing to upload");
        Ok(())
    }
}
