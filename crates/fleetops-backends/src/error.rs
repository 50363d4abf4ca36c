//! Backend error types

use fleetops_engine::DeployError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("usacloud not found. Please install: https://docs.usacloud.jp/usacloud/installation/")]
    UsacloudNotFound,

    #[error("usacloud command failed: {0}")]
    CommandFailed(String),

    #[error("ssh-keygen failed: {0}")]
    KeygenFailed(String),

    #[error("Missing attribute '{0}'")]
    MissingAttribute(String),

    #[error("Invalid setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Attach the resource name when surfacing a backend failure to the engine
pub trait ResourceContext<T> {
    fn for_resource(self, name: &str) -> fleetops_engine::Result<T>;
}

impl<T> ResourceContext<T> for Result<T> {
    fn for_resource(self, name: &str) -> fleetops_engine::Result<T> {
        self.map_err(|e| DeployError::backend(name, e.to_string()))
    }
}
