//! Fleetops state store
//!
//! Persists deployments and their resource rows in a single JSON document.
//!
//! ## Main features
//!
//! - **Attribute bags**: every deployment and resource carries string
//!   attributes with typed encoders and decoders
//! - **Nested transactions**: only the outermost scope writes; any failure
//!   leaves the file untouched
//! - **Pluggable storage and locking**: the file can be fetched from and
//!   uploaded to a remote, and guarded by a cross-process lock

pub mod attr;
pub mod document;
pub mod error;
pub mod lock;
pub mod storage;
pub mod store;

pub use attr::AttrValue;
pub use document::{
    DeploymentRecord, ResourceId, ResourceRecord, SCHEMA_VERSION, StateDocument, keys,
};
pub use error::{Result, StateError};
pub use lock::{FileLock, LockBackend, LockGuard, NoLock, acquire};
pub use storage::{LocalStorage, StorageBackend};
pub use store::{StateFile, Transaction};
