//! Engine error types

use crate::parallel::{MultipleErrors, ParallelError};
use crate::transport::TransportError;
use fleetops_core::EvalError;
use fleetops_state::StateError;
use thiserror::Error;

/// Deployment errors
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Unknown resource type '{resource_type}' for resource '{name}'")]
    UnknownResourceType { name: String, resource_type: String },

    #[error(
        "Resource '{name}' changed type from '{stored}' to '{declared}'; destroy it first to recreate it"
    )]
    TypeChanged {
        name: String,
        stored: String,
        declared: String,
    },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Dependency '{dependency}' of '{resource}' failed")]
    DependencyFailed {
        resource: String,
        dependency: String,
    },

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Activation of '{machine}' failed with exit code {exit_code}")]
    Activation { machine: String, exit_code: i32 },

    #[error("Machine '{machine}' requires a reboot; rerun with --allow-reboot")]
    RebootRequired { machine: String },

    #[error("Machine '{machine}' did not become reachable after {attempts} attempts")]
    Unreachable { machine: String, attempts: u32 },

    #[error("{resource}: {message}")]
    Backend { resource: String, message: String },

    #[error(
        "Resource '{0}' no longer exists remotely; rerun with --allow-recreate to create it again"
    )]
    ResourceGone(String),

    #[error("'{resource}' does not support {operation}")]
    Unsupported { resource: String, operation: String },

    #[error("Backup '{backup_id}' not found on '{machine}'")]
    BackupNotFound { machine: String, backup_id: String },

    #[error("Generation {0} not found")]
    GenerationNotFound(i64),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("{0}")]
    Multiple(MultipleErrors<DeployError>),

    #[error("Interrupted")]
    Interrupted,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub fn backend(resource: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::Backend {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        DeployError::Unsupported {
            resource: resource.into(),
            operation: operation.into(),
        }
    }

    /// Whether the error means the remote side could not be reached
    pub fn is_connection_failure(&self) -> bool {
        match self {
            DeployError::Transport(e) => e.is_connection_failure(),
            DeployError::Unreachable { .. } => true,
            _ => false,
        }
    }
}

impl From<ParallelError<DeployError>> for DeployError {
    fn from(err: ParallelError<DeployError>) -> Self {
        match err {
            ParallelError::Single { error, .. } => error,
            ParallelError::Multiple(errors) => DeployError::Multiple(errors),
            ParallelError::NoWorkers => {
                DeployError::InvalidOption("the worker count must be at least 1".to_string())
            }
            ParallelError::DuplicateTask(name) => {
                DeployError::InvalidOption(format!("'{name}' was scheduled twice"))
            }
            ParallelError::Interrupted => DeployError::Interrupted,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
