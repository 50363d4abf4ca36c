use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while evaluating deployment sources
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("No source files are configured for this deployment")]
    NoSources,

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Template error in {file}: {message}")]
    Template { file: PathBuf, message: String },

    #[error("KDL parse error in {file}: {message}")]
    Kdl { file: PathBuf, message: String },

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Resource '{name}' is defined more than once")]
    DuplicateDefinition { name: String },

    #[error("Invalid value for '{key}' in '{resource}': {message}")]
    InvalidValue {
        resource: String,
        key: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, EvalError>;
