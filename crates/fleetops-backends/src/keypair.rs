//! `ssh-keypair` backend: a key pair generated locally and kept in the state

use crate::error::{BackendError, ResourceContext};
use async_trait::async_trait;
use fleetops_core::Definition;
use fleetops_engine::resource::attrs;
use fleetops_engine::{CreateOptions, Resource, ResourceHandle, ResourceState, Result};
use fleetops_state::AttrValue;
use std::process::Stdio;
use tokio::process::Command;

pub const RESOURCE_TYPE: &str = "ssh-keypair";

pub const PRIVATE_KEY: &str = "privateKey";
pub const PUBLIC_KEY: &str = "publicKey";
pub const KEY_TYPE: &str = "keyType";

const DEFAULT_KEY_TYPE: &str = "ed25519";

pub struct SshKeyPair {
    handle: ResourceHandle,
}

impl SshKeyPair {
    pub fn new(handle: ResourceHandle) -> Self {
        Self { handle }
    }

    /// Public key of a key pair row, used by machines referencing it
    pub fn public_key_of(record: &fleetops_state::ResourceRecord) -> Option<String> {
        record.get_str(PUBLIC_KEY).map(str::to_string)
    }
}

/// Run ssh-keygen in a scratch directory and read both halves back
pub async fn generate(key_type: &str, comment: &str) -> crate::error::Result<(String, String)> {
    let dir = tempfile::tempdir()?;
    let key_path = dir.path().join("key");

    let output = Command::new("ssh-keygen")
        .arg("-t")
        .arg(key_type)
        .args(["-N", "", "-q", "-C", comment, "-f"])
        .arg(&key_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !output.status.success() {
        return Err(BackendError::KeygenFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let private_key = tokio::fs::read_to_string(&key_path).await?;
    let public_key = tokio::fs::read_to_string(key_path.with_extension("pub")).await?;
    Ok((private_key, public_key.trim().to_string()))
}

#[async_trait]
impl Resource for SshKeyPair {
    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    async fn create(&self, definition: &Definition, _options: &CreateOptions) -> Result<()> {
        let key_type = definition.get_str("key-type").unwrap_or(DEFAULT_KEY_TYPE);
        if self.handle.get_str(PRIVATE_KEY).is_some() {
            if self.handle.get_str(KEY_TYPE).as_deref() != Some(key_type) {
                self.handle
                    .log()
                    .warn("key type changed; destroy the key pair to generate a new one");
            }
            return Ok(());
        }

        let log = self.handle.log();
        log.log(format!("generating {key_type} key pair..."));
        let comment = format!("fleetops-{}-{}", self.handle.deployment(), self.name());
        let (private_key, public_key) = generate(key_type, &comment)
            .await
            .for_resource(self.name())?;

        self.handle
            .set_attrs(vec![
                (PRIVATE_KEY, AttrValue::from(private_key)),
                (PUBLIC_KEY, AttrValue::from(public_key)),
                (KEY_TYPE, AttrValue::from(key_type)),
                (attrs::STATE, AttrValue::from(ResourceState::Up)),
            ])
            .await
    }

    async fn destroy(&self, _wipe: bool) -> Result<bool> {
        // nothing exists outside the state
        Ok(true)
    }
}
