//! `sakura-server` backend: a Sakura Cloud server managed through usacloud
//!
//! ```kdl
//! resource "sakura-server" "web" {
//!     zone "is1a"
//!     core 2
//!     memory 4
//!     disk-size 40
//!     os-type "ubuntu"
//!     ssh-keys "deploy-key"
//! }
//! ```

use crate::error::ResourceContext;
use crate::keypair::SshKeyPair;
use crate::none::{TARGET_HOST, stored_target};
use crate::probe::probe_machine;
use crate::usacloud::{CreateServerConfig, ServerInfo, Usacloud};
use async_trait::async_trait;
use fleetops_core::Definition;
use fleetops_engine::resource::attrs;
use fleetops_engine::{
    CheckResult, CreateOptions, DeployError, Lookup, Machine, Resource, ResourceHandle,
    ResourceState, Result, Target, Transport, WaitConfig, wait_for_reachable,
};
use fleetops_state::AttrValue;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const RESOURCE_TYPE: &str = "sakura-server";

pub const SERVER_ID: &str = "serverId";
pub const ZONE: &str = "zone";

const DEFAULT_ZONE: &str = "is1a";

pub struct SakuraServer {
    handle: ResourceHandle,
    transport: Arc<dyn Transport>,
}

impl SakuraServer {
    pub fn new(handle: ResourceHandle, transport: Arc<dyn Transport>) -> Self {
        Self { handle, transport }
    }

    fn usacloud(&self) -> Usacloud {
        Usacloud::new(
            self.handle
                .get_str(ZONE)
                .unwrap_or_else(|| DEFAULT_ZONE.to_string()),
        )
    }

    fn server_id(&self) -> Result<String> {
        self.handle
            .get_str(SERVER_ID)
            .ok_or_else(|| DeployError::ResourceGone(self.name().to_string()))
    }

    async fn lookup(&self) -> Result<Lookup<ServerInfo>> {
        match self.handle.get_str(SERVER_ID) {
            Some(id) => self
                .usacloud()
                .read_server(&id)
                .await
                .for_resource(self.name()),
            None => Ok(Lookup::Absent),
        }
    }

    async fn record_server(&self, server: &ServerInfo, state: ResourceState) -> Result<()> {
        let mut values = vec![
            (SERVER_ID, AttrValue::from(server.id.as_str())),
            (attrs::STATE, AttrValue::from(state)),
        ];
        if let Some(ip) = server.ip_address() {
            values.push((TARGET_HOST, AttrValue::from(ip)));
        }
        self.handle.set_attrs(values).await
    }

    /// Register the public keys of the referenced key pairs
    async fn ssh_key_ids(
        &self,
        usacloud: &Usacloud,
        definition: &Definition,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for key_name in definition.get_list("ssh-keys") {
            let record = self.handle.peer(&key_name).ok_or_else(|| {
                DeployError::backend(self.name(), format!("unknown key pair '{key_name}'"))
            })?;
            let public_key = SshKeyPair::public_key_of(&record).ok_or_else(|| {
                DeployError::backend(
                    self.name(),
                    format!("key pair '{key_name}' has no public key"),
                )
            })?;
            let registered = format!("fleetops-{}-{}", self.handle.deployment(), key_name);
            ids.push(
                usacloud
                    .ensure_ssh_key(&registered, &public_key)
                    .await
                    .for_resource(self.name())?,
            );
        }
        Ok(ids)
    }
}

fn state_of(server: &ServerInfo) -> ResourceState {
    match server.instance_status.as_deref() {
        Some("up") => ResourceState::Up,
        Some("down") => ResourceState::Stopped,
        Some("cleaning" | "migrating") => ResourceState::Starting,
        _ => ResourceState::Unknown,
    }
}

#[async_trait]
impl Resource for SakuraServer {
    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn as_machine(&self) -> Option<&dyn Machine> {
        Some(self)
    }

    fn show_type(&self) -> String {
        format!("{RESOURCE_TYPE} [{}]", self.usacloud().zone())
    }

    /// Key pairs named under `ssh-keys` come first
    fn create_after(
        &self,
        resources: &BTreeSet<String>,
        definition: &Definition,
    ) -> BTreeSet<String> {
        definition
            .depends_on()
            .into_iter()
            .chain(definition.get_list("ssh-keys"))
            .filter(|name| resources.contains(name))
            .collect()
    }

    async fn create(&self, definition: &Definition, options: &CreateOptions) -> Result<()> {
        let zone = definition.get_str("zone").unwrap_or(DEFAULT_ZONE);
        if let Some(stored) = self.handle.get_str(ZONE)
            && stored != zone
            && self.handle.get_str(SERVER_ID).is_some()
        {
            return Err(DeployError::backend(
                self.name(),
                format!("cannot move the server from zone '{stored}' to '{zone}'"),
            ));
        }
        self.handle.set_attr(ZONE, zone).await?;
        let usacloud = self.usacloud();
        let log = self.handle.log();

        if self.handle.get_str(SERVER_ID).is_some() {
            if !options.check {
                return Ok(());
            }
            match self.lookup().await? {
                Lookup::Present(server) => {
                    if !server.is_running() {
                        log.log("server is down, booting it...");
                        usacloud
                            .power_on(&server.id)
                            .await
                            .for_resource(self.name())?;
                    }
                    return self.record_server(&server, ResourceState::Up).await;
                }
                Lookup::Absent => {
                    options.on_absent(self.name())?;
                    log.warn("server no longer exists, creating it again");
                    self.handle
                        .remove_attrs(&[SERVER_ID, TARGET_HOST, attrs::CURRENT_CONFIG])
                        .await?;
                }
            }
        }

        let config = CreateServerConfig {
            name: format!("fleetops-{}", self.name()),
            core: definition.get_i64("core").unwrap_or(1),
            memory: definition.get_i64("memory").unwrap_or(1),
            disk_size: definition.get_i64("disk-size"),
            os_type: Some(definition.get_str("os-type").unwrap_or("ubuntu").to_string()),
            ssh_key_ids: self.ssh_key_ids(&usacloud, definition).await?,
        };
        log.log(format!("creating server in {zone}..."));
        let server = usacloud
            .create_server(&config)
            .await
            .for_resource(self.name())?;
        self.record_server(&server, ResourceState::Starting).await?;
        log.success(format!(
            "created server {} ({})",
            server.id,
            server.ip_address().unwrap_or_default()
        ));

        log.log("waiting for SSH...");
        let target = self.target()?;
        wait_for_reachable(self.transport.as_ref(), &target, &WaitConfig::default()).await?;
        self.handle.set_state(ResourceState::Up).await
    }

    async fn destroy(&self, _wipe: bool) -> Result<bool> {
        let Some(id) = self.handle.get_str(SERVER_ID) else {
            return Ok(true);
        };
        self.handle.log().log("deleting server and its disks...");
        match self
            .usacloud()
            .delete_server(&id, true)
            .await
            .for_resource(self.name())?
        {
            Lookup::Present(()) => {}
            Lookup::Absent => self.handle.log().warn("server was already gone"),
        }
        Ok(true)
    }

    async fn check(&self) -> Result<CheckResult> {
        let server = match self.lookup().await? {
            Lookup::Present(server) => server,
            Lookup::Absent => return Ok(CheckResult::default()),
        };
        let state = state_of(&server);
        if state != ResourceState::Up {
            return Ok(CheckResult {
                state,
                exists: true,
                ..Default::default()
            });
        }
        if self.handle.state() != ResourceState::Up {
            self.handle.set_state(ResourceState::Up).await?;
        }
        let target = self.target()?;
        Ok(probe_machine(self.transport.as_ref(), &target, &self.handle).await)
    }
}

#[async_trait]
impl Machine for SakuraServer {
    fn target(&self) -> Result<Target> {
        stored_target(&self.handle, TARGET_HOST)
    }

    async fn reboot(&self, transport: &dyn Transport, hard: bool) -> Result<()> {
        if !hard {
            let target = self.target()?;
            match transport
                .run_command(&target, "systemctl reboot || reboot")
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_connection_failure() => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            self.usacloud()
                .reset(&self.server_id()?)
                .await
                .for_resource(self.name())?;
        }
        self.handle.set_state(ResourceState::Starting).await
    }

    async fn start(&self) -> Result<()> {
        self.usacloud()
            .power_on(&self.server_id()?)
            .await
            .for_resource(self.name())?;
        self.handle.set_state(ResourceState::Starting).await
    }

    async fn stop(&self) -> Result<()> {
        self.handle.set_state(ResourceState::Stopping).await?;
        self.usacloud()
            .power_off(&self.server_id()?)
            .await
            .for_resource(self.name())?;
        self.handle.set_state(ResourceState::Stopped).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(status: Option<&str>) -> ServerInfo {
        ServerInfo {
            id: "113".to_string(),
            name: "fleetops-web".to_string(),
            cpu: None,
            memory_mb: None,
            instance_status: status.map(str::to_string),
            interfaces: None,
        }
    }

    #[test]
    fn test_state_of_instance_status() {
        assert_eq!(state_of(&server(Some("up"))), ResourceState::Up);
        assert_eq!(state_of(&server(Some("down"))), ResourceState::Stopped);
        assert_eq!(state_of(&server(Some("cleaning"))), ResourceState::Starting);
        assert_eq!(state_of(&server(None)), ResourceState::Unknown);
    }

    #[test]
    fn test_key_type_constant_matches_keypair_backend() {
        assert_eq!(crate::keypair::RESOURCE_TYPE, fleetops_core::KEYPAIR_TYPE);
    }
}
