//! Transactional access to the state file
//!
//! [`StateFile`] keeps the last committed document in memory for readers and
//! serializes writers through transactions. Transactions nest: only the
//! outermost scope takes the exclusive lock, re-reads the file and, on
//! commit, writes it back atomically. Dropping the outermost scope without
//! committing discards every change made at any depth.

use crate::document::{SCHEMA_VERSION, StateDocument};
use crate::error::{Result, StateError};
use crate::lock::{self, LockBackend, LockGuard, NoLock};
use crate::storage::{LocalStorage, StorageBackend};
use chrono::Utc;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};

/// Mutable part shared by all scopes of one transaction
#[derive(Debug, Default)]
struct Session {
    depth: usize,
    working: Option<StateDocument>,
}

/// Handle on one state file
pub struct StateFile {
    path: PathBuf,
    storage: Arc<dyn StorageBackend>,
    lock: Arc<dyn LockBackend>,
    session: Mutex<Session>,
    committed: RwLock<StateDocument>,
}

impl std::fmt::Debug for StateFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFile")
            .field("path", &self.path)
            .field("storage", &self.storage.name())
            .field("lock", &self.lock.name())
            .finish()
    }
}

impl StateFile {
    /// Open a local state file without external storage or locking
    pub async fn open_local(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, Arc::new(LocalStorage), Arc::new(NoLock)).await
    }

    /// Fetch the state through `storage` and load it
    pub async fn open(
        path: impl AsRef<Path>,
        storage: Arc<dyn StorageBackend>,
        lock: Arc<dyn LockBackend>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        storage.fetch_to_file(&path).await?;

        let document = read_document(&path).await?;
        storage.on_open(&document).await?;

        if path.exists() {
            let backup = backup_path(&path);
            fs::copy(&path, &backup)
                .await
                .map_err(|e| StateError::io(&backup, e))?;
            tracing::debug!("Created state backup at {}", backup.display());
        }

        tracing::debug!(
            path = %path.display(),
            deployments = document.deployments.len(),
            "Opened state file"
        );

        Ok(Self {
            path,
            storage,
            lock,
            session: Mutex::new(Session::default()),
            committed: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the cross-process lock for the duration of a command
    pub async fn lock(&self, description: &str, exclusive: bool) -> Result<LockGuard> {
        lock::acquire(self.lock.clone(), description, exclusive).await
    }

    /// Read the last committed document. Uncommitted changes of a running
    /// transaction are never visible here.
    pub fn read<T>(&self, f: impl FnOnce(&StateDocument) -> T) -> T {
        let guard = self.committed.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    /// Clone of the last committed document
    pub fn snapshot(&self) -> StateDocument {
        self.read(|doc| doc.clone())
    }

    /// Enter the outermost transaction scope: take the exclusive lock and
    /// load the current file contents into a working copy.
    pub async fn begin(&self) -> Result<Transaction<'_>> {
        let mut guard = self.session.lock().await;
        debug_assert_eq!(guard.depth, 0, "outermost scope entered twice");

        let document = read_document(&self.path).await?;
        guard.working = Some(document);
        guard.depth = 1;
        tracing::trace!("Transaction started");

        Ok(Transaction {
            scope: Scope::Outer(guard),
            store: self,
            finished: false,
        })
    }

    /// Run `f` inside its own transaction and commit when it succeeds
    pub async fn transact<T, E>(
        &self,
        f: impl FnOnce(&mut StateDocument) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StateError>,
    {
        let mut txn = self.begin().await?;
        let value = f(&mut *txn)?;
        txn.commit().await?;
        Ok(value)
    }

    async fn persist(&self, document: &StateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::io(parent, e))?;
        }

        let tmp = temp_path(&self.path);
        let content = serde_json::to_string_pretty(document)?;
        fs::write(&tmp, content)
            .await
            .map_err(|e| StateError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StateError::io(&self.path, e))?;

        self.storage.upload_from_file(&self.path).await?;

        *self.committed.write().unwrap_or_else(|e| e.into_inner()) = document.clone();
        tracing::debug!(
            deployments = document.deployments.len(),
            "Committed state"
        );
        Ok(())
    }
}

enum Scope<'a> {
    Outer(MutexGuard<'a, Session>),
    Nested(&'a mut Session),
}

/// One scope of a (possibly nested) transaction
///
/// Dereferences to the working [`StateDocument`].
pub struct Transaction<'a> {
    scope: Scope<'a>,
    store: &'a StateFile,
    finished: bool,
}

impl<'a> Transaction<'a> {
    fn session(&mut self) -> &mut Session {
        match &mut self.scope {
            Scope::Outer(guard) => &mut **guard,
            Scope::Nested(session) => &mut **session,
        }
    }

    fn session_ref(&self) -> &Session {
        match &self.scope {
            Scope::Outer(guard) => &**guard,
            Scope::Nested(session) => &**session,
        }
    }

    /// Current nesting depth (1 for the outermost scope)
    pub fn depth(&self) -> usize {
        self.session_ref().depth
    }

    /// Enter a nested scope. No lock is taken and nothing is re-read.
    pub fn nested(&mut self) -> Transaction<'_> {
        let store = self.store;
        let session = self.session();
        session.depth += 1;
        Transaction {
            scope: Scope::Nested(session),
            store,
            finished: false,
        }
    }

    /// Leave this scope successfully. Only the outermost commit writes the
    /// file and releases the lock.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        let store = self.store;
        let session = self.session();
        session.depth -= 1;
        if session.depth > 0 {
            return Ok(());
        }

        let mut document = session.working.take().ok_or(StateError::NoTransaction)?;
        document.updated_at = Utc::now();
        store.persist(&document).await
    }
}

impl Deref for Transaction<'_> {
    type Target = StateDocument;

    fn deref(&self) -> &StateDocument {
        self.session_ref()
            .working
            .as_ref()
            .expect("working copy exists while a scope is open")
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut StateDocument {
        self.session()
            .working
            .as_mut()
            .expect("working copy exists while a scope is open")
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let session = self.session();
        session.depth -= 1;
        if session.depth == 0 {
            session.working = None;
            tracing::debug!("Transaction rolled back");
        }
    }
}

async fn read_document(path: &Path) -> Result<StateDocument> {
    if !path.exists() {
        tracing::debug!("State file not found, starting from an empty state");
        return Ok(StateDocument::new());
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StateError::io(path, e))?;
    if content.trim().is_empty() {
        return Ok(StateDocument::new());
    }

    let document: StateDocument = serde_json::from_str(&content)?;
    if document.version != SCHEMA_VERSION {
        return Err(StateError::SchemaVersion {
            found: document.version,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(document)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".backup")
}
