//! usacloud CLI wrapper
//!
//! Wraps the usacloud commands needed by the `sakura-server` backend.

use crate::error::{BackendError, Result};
use fleetops_engine::Lookup;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// usacloud CLI wrapper bound to one zone
#[derive(Debug, Clone)]
pub struct Usacloud {
    zone: String,
}

impl Usacloud {
    pub fn new(zone: impl Into<String>) -> Self {
        Self { zone: zone.into() }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Run a usacloud command and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("usacloud");
        cmd.arg("--zone").arg(&self.zone);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: usacloud --zone {} {}", self.zone, args.join(" "));

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::UsacloudNotFound
            } else {
                BackendError::IoError(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Get a server by id; `Absent` when Sakura Cloud no longer knows it
    pub async fn read_server(&self, id: &str) -> Result<Lookup<ServerInfo>> {
        match self
            .run_command(&["server", "read", id, "--output-type", "json"])
            .await
        {
            Ok(output) => Ok(Lookup::Present(parse_server(&output)?)),
            Err(BackendError::CommandFailed(message)) if is_not_found(&message) => {
                Ok(Lookup::Absent)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_server(&self, config: &CreateServerConfig) -> Result<ServerInfo> {
        let args = create_args(config);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_command(&args).await?;
        parse_server(&output)
    }

    pub async fn delete_server(&self, id: &str, with_disks: bool) -> Result<Lookup<()>> {
        let mut args = vec!["server", "delete", id, "--force", "--yes"];
        if with_disks {
            args.push("--with-disks");
        }

        match self.run_command(&args).await {
            Ok(_) => Ok(Lookup::Present(())),
            Err(BackendError::CommandFailed(message)) if is_not_found(&message) => {
                Ok(Lookup::Absent)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn power_on(&self, id: &str) -> Result<()> {
        self.run_command(&["server", "boot", id, "--yes"]).await?;
        Ok(())
    }

    /// Graceful shutdown
    pub async fn power_off(&self, id: &str) -> Result<()> {
        self.run_command(&["server", "shutdown", id, "--yes"]).await?;
        Ok(())
    }

    /// Hard reset
    pub async fn reset(&self, id: &str) -> Result<()> {
        self.run_command(&["server", "reset", id, "--yes"]).await?;
        Ok(())
    }

    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKeyInfo>> {
        let output = self
            .run_command(&["ssh-key", "list", "--output-type", "json"])
            .await?;

        if output.trim().is_empty() || output.trim() == "[]" {
            return Ok(Vec::new());
        }

        let keys: Vec<SshKeyInfo> = serde_json::from_str(&output)?;
        Ok(keys)
    }

    pub async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKeyInfo> {
        let output = self
            .run_command(&[
                "ssh-key",
                "create",
                "--name",
                name,
                "--public-key-content",
                public_key,
                "--output-type",
                "json",
            ])
            .await?;

        let key: SshKeyInfo = parse_single(&output)?;
        Ok(key)
    }

    /// Id of the key registered under `name`, registering it when missing
    pub async fn ensure_ssh_key(&self, name: &str, public_key: &str) -> Result<String> {
        if let Some(existing) = self
            .list_ssh_keys()
            .await?
            .into_iter()
            .find(|k| k.name == name)
        {
            return Ok(existing.id);
        }
        Ok(self.create_ssh_key(name, public_key).await?.id)
    }
}

fn is_not_found(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("404") || message.contains("not found")
}

/// usacloud prints either an object or a one-element array
fn parse_single<T: serde::de::DeserializeOwned>(output: &str) -> Result<T> {
    let value: serde_json::Value = serde_json::from_str(output)?;
    let value = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

fn parse_server(output: &str) -> Result<ServerInfo> {
    parse_single(output)
}

/// Arguments of `usacloud server create`
pub fn create_args(config: &CreateServerConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "server",
        "create",
        "--name",
        config.name.as_str(),
        "--cpu",
        config.core.to_string().as_str(),
        "--memory",
        config.memory.to_string().as_str(),
        "--output-type",
        "json",
        "--yes",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(disk_size) = config.disk_size {
        args.push("--disk-size".to_string());
        args.push(disk_size.to_string());
    }

    if let Some(os) = &config.os_type {
        args.push("--disk-os-type".to_string());
        args.push(os.clone());
    }

    for id in &config.ssh_key_ids {
        args.push("--disk-edit-ssh-key-ids".to_string());
        args.push(id.clone());
    }

    args
}

/// Server information from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "CPU")]
    pub cpu: Option<i32>,

    #[serde(rename = "MemoryMB")]
    pub memory_mb: Option<i32>,

    #[serde(rename = "InstanceStatus")]
    pub instance_status: Option<String>,

    #[serde(rename = "Interfaces")]
    pub interfaces: Option<Vec<InterfaceInfo>>,
}

impl ServerInfo {
    /// Get the first IP address
    pub fn ip_address(&self) -> Option<String> {
        self.interfaces
            .as_ref()?
            .iter()
            .find_map(|i| i.ip_address.clone())
    }

    pub fn is_running(&self) -> bool {
        self.instance_status.as_deref() == Some("up")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    #[serde(rename = "IPAddress")]
    pub ip_address: Option<String>,
}

/// Configuration for creating a server
#[derive(Debug, Clone)]
pub struct CreateServerConfig {
    pub name: String,
    pub core: i64,
    /// GiB
    pub memory: i64,
    pub disk_size: Option<i64>,
    pub os_type: Option<String>,
    pub ssh_key_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyInfo {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "PublicKey")]
    pub public_key: Option<String>,
}
