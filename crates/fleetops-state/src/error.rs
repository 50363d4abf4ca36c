//! State store error types

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// State store errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Ambiguous deployment name '{0}', use its UUID instead")]
    AmbiguousDeployment(String),

    #[error("Resource '{name}' already exists in deployment {deployment}")]
    DuplicateResource { deployment: Uuid, name: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource '{name}' is stored under id {key} but carries id {id}")]
    MisplacedResource { name: String, key: u64, id: u64 },

    #[error("Deployment {uuid} still has {count} resource(s); destroy them first or force the deletion")]
    DeploymentNotEmpty { uuid: Uuid, count: usize },

    #[error("State file schema version {found} is not supported (expected {supported})")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("Attribute '{key}' has an invalid value '{value}': {reason}")]
    InvalidAttribute {
        key: String,
        value: String,
        reason: String,
    },

    #[error("State is locked by {holder} since {since}")]
    Locked { holder: String, since: String },

    #[error("No transaction is active")]
    NoTransaction,

    #[error("Storage backend error: {0}")]
    Storage(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
