//! Remote command execution contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Where to reach a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Machine resource name
    pub machine: String,
    pub host: String,
    pub user: String,
    pub port: u16,
}

impl Target {
    pub fn new(machine: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            host: host.into(),
            user: "root".to_string(),
            port: 22,
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Cannot connect to {host}: {message}")]
    ConnectionFailed { host: String, message: String },

    #[error("Command `{command}` failed on {host} with exit code {exit_code}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Transport IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, TransportError::ConnectionFailed { .. })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command` on the target. A non-zero exit status is not an error
    /// here; connection problems are.
    async fn run_command(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<CommandOutput, TransportError>;

    async fn upload_file(
        &self,
        target: &Target,
        local: &Path,
        remote: &str,
    ) -> Result<(), TransportError>;

    async fn download_file(
        &self,
        target: &Target,
        remote: &str,
        local: &Path,
    ) -> Result<(), TransportError>;

    /// Run `command` and fail on a non-zero exit status
    async fn run_checked(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<CommandOutput, TransportError> {
        let output = self.run_command(target, command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(TransportError::CommandFailed {
                host: target.host.clone(),
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}
