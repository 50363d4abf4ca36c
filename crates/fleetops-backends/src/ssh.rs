//! Transport over the system `ssh` and `scp` clients

use async_trait::async_trait;
use fleetops_engine::{CommandOutput, Target, Transport, TransportError};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_ERROR: i32 = 255;

#[derive(Debug, Clone, PartialEq)]
pub struct SshOptions {
    pub identity_file: Option<PathBuf>,
    /// Seconds
    pub connect_timeout: u64,
    pub strict_host_key_checking: bool,
    pub extra_args: Vec<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            identity_file: None,
            connect_timeout: 10,
            strict_host_key_checking: false,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Options shared by ssh and scp
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout),
            "-o".to_string(),
            if self.options.strict_host_key_checking {
                "StrictHostKeyChecking=yes".to_string()
            } else {
                "StrictHostKeyChecking=accept-new".to_string()
            },
        ];
        if let Some(identity) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.extend(self.options.extra_args.iter().cloned());
        args
    }

    pub fn ssh_args(&self, target: &Target, command: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.push("-p".to_string());
        args.push(target.port.to_string());
        args.push(target.destination());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }

    pub fn scp_args(&self, target: &Target, from: String, to: String) -> Vec<String> {
        let mut args = self.common_args();
        args.push("-P".to_string());
        args.push(target.port.to_string());
        args.push(from);
        args.push(to);
        args
    }

    fn remote_path(target: &Target, path: &str) -> String {
        format!("{}:{}", target.destination(), path)
    }

    async fn run(program: &str, args: &[String]) -> Result<Output, TransportError> {
        tracing::debug!("Running: {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }

    async fn copy(
        &self,
        target: &Target,
        from: String,
        to: String,
        description: &str,
    ) -> Result<(), TransportError> {
        let output = Self::run("scp", &self.scp_args(target, from, to)).await?;
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match code {
            0 => Ok(()),
            SSH_CONNECTION_ERROR => Err(TransportError::ConnectionFailed {
                host: target.host.clone(),
                message: stderr,
            }),
            exit_code => Err(TransportError::CommandFailed {
                host: target.host.clone(),
                command: description.to_string(),
                exit_code,
                stderr,
            }),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run_command(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<CommandOutput, TransportError> {
        let output = Self::run("ssh", &self.ssh_args(target, command)).await?;
        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_code == SSH_CONNECTION_ERROR {
            return Err(TransportError::ConnectionFailed {
                host: target.host.clone(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn upload_file(
        &self,
        target: &Target,
        local: &Path,
        remote: &str,
    ) -> Result<(), TransportError> {
        self.copy(
            target,
            local.display().to_string(),
            Self::remote_path(target, remote),
            &format!("upload {}", local.display()),
        )
        .await
    }

    async fn download_file(
        &self,
        target: &Target,
        remote: &str,
        local: &Path,
    ) -> Result<(), TransportError> {
        self.copy(
            target,
            Self::remote_path(target, remote),
            local.display().to_string(),
            &format!("download {remote}"),
        )
        .await
    }
}
