//! Resource contract implemented by every backend
//!
//! A backend type provides a [`Resource`] implementation built around a
//! [`ResourceHandle`], which gives it access to its own row in the state
//! store. Machines additionally implement [`Machine`].

use crate::error::{DeployError, Result};
use crate::log::ResourceLog;
use crate::parallel::Named;
use crate::transport::{Target, Transport};
use crate::wait::{WaitConfig, wait_for_reachable};
use async_trait::async_trait;
use fleetops_core::Definition;
use fleetops_state::{AttrValue, ResourceId, ResourceRecord, StateError, StateFile};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Generic attribute keys maintained by the engine
pub mod attrs {
    pub const STATE: &str = "state";
    pub const INDEX: &str = "index";
    pub const OBSOLETE: &str = "obsolete";
    pub const CURRENT_CONFIG: &str = "currentConfig";
    pub const GENERATIONS: &str = "generations";
    pub const BACKUPS: &str = "backups";
    /// Names this resource waited on when it was last created
    pub const CREATE_AFTER: &str = "createAfter";
}

/// Lifecycle status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    #[default]
    Missing,
    Starting,
    Up,
    Stopping,
    Stopped,
    Unreachable,
    Rescue,
    Unknown,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Missing => "MISSING",
            ResourceState::Starting => "STARTING",
            ResourceState::Up => "UP",
            ResourceState::Stopping => "STOPPING",
            ResourceState::Stopped => "STOPPED",
            ResourceState::Unreachable => "UNREACHABLE",
            ResourceState::Rescue => "RESCUE",
            ResourceState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceState {
    type Err = StateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "MISSING" => ResourceState::Missing,
            "STARTING" => ResourceState::Starting,
            "UP" => ResourceState::Up,
            "STOPPING" => ResourceState::Stopping,
            "STOPPED" => ResourceState::Stopped,
            "UNREACHABLE" => ResourceState::Unreachable,
            "RESCUE" => ResourceState::Rescue,
            "UNKNOWN" => ResourceState::Unknown,
            other => {
                return Err(StateError::InvalidAttribute {
                    key: attrs::STATE.to_string(),
                    value: other.to_string(),
                    reason: "unknown resource state".to_string(),
                });
            }
        })
    }
}

impl From<ResourceState> for AttrValue {
    fn from(state: ResourceState) -> Self {
        AttrValue::Str(state.as_str().to_string())
    }
}

/// Outcome of a remote lookup
///
/// Backends return `Absent` when the remote object is gone instead of
/// failing, so callers can decide whether to recreate it.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Present(T),
    Absent,
}

impl<T> Lookup<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }

    pub fn present(self) -> Option<T> {
        match self {
            Lookup::Present(value) => Some(value),
            Lookup::Absent => None,
        }
    }
}

/// Flags passed to [`Resource::create`]
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Verify remote state instead of trusting the stored attributes
    pub check: bool,
    pub allow_reboot: bool,
    pub allow_recreate: bool,
}

impl CreateOptions {
    /// Decide what to do about a resource that vanished remotely
    pub fn on_absent(&self, name: &str) -> Result<()> {
        if self.allow_recreate {
            Ok(())
        } else {
            Err(DeployError::ResourceGone(name.to_string()))
        }
    }
}

/// Snapshot returned by [`Resource::check`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckResult {
    pub state: ResourceState,
    pub exists: bool,
    /// `None` when reachability does not apply to the resource
    pub is_reachable: Option<bool>,
    /// The live configuration differs from the last activated one
    pub is_outdated: bool,
    pub messages: Vec<String>,
}

/// A resource's view of its own row in the state store
#[derive(Clone)]
pub struct ResourceHandle {
    state: Arc<StateFile>,
    deployment: Uuid,
    id: ResourceId,
    name: String,
    resource_type: String,
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("deployment", &self.deployment)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.resource_type)
            .finish()
    }
}

impl ResourceHandle {
    pub fn new(state: Arc<StateFile>, deployment: Uuid, record: &ResourceRecord) -> Self {
        Self {
            state,
            deployment,
            id: record.id,
            name: record.name.clone(),
            resource_type: record.resource_type.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn deployment(&self) -> Uuid {
        self.deployment
    }

    pub fn state_file(&self) -> &Arc<StateFile> {
        &self.state
    }

    fn with_record<T>(&self, f: impl FnOnce(&ResourceRecord) -> T) -> Option<T> {
        self.state.read(|doc| {
            doc.deployments
                .get(&self.deployment)
                .and_then(|d| d.resources.get(&self.id))
                .map(f)
        })
    }

    /// Last committed copy of the row
    pub fn record(&self) -> Result<ResourceRecord> {
        self.with_record(Clone::clone)
            .ok_or_else(|| DeployError::ResourceNotFound(self.name.clone()))
    }

    pub fn exists(&self) -> bool {
        self.with_record(|_| ()).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.with_record(|r| r.get_str(key).map(str::to_string))
            .flatten()
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.with_record(|r| r.get_int(key)).transpose()?.flatten())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self
            .with_record(|r| r.get_bool(key))
            .transpose()?
            .unwrap_or(false))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.with_record(|r| r.get_json(key)).transpose()?.flatten())
    }

    pub fn state(&self) -> ResourceState {
        let Some(raw) = self.get_str(attrs::STATE) else {
            return ResourceState::Missing;
        };
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(
                resource = %self.name,
                state = %raw,
                "Unknown stored state, treating the resource as missing"
            );
            ResourceState::Missing
        })
    }

    /// Names stored by the create phase, restricted to `resources`
    pub fn recorded_create_after(&self, resources: &BTreeSet<String>) -> BTreeSet<String> {
        match self.get_json::<BTreeSet<String>>(attrs::CREATE_AFTER) {
            Ok(names) => names
                .unwrap_or_default()
                .into_iter()
                .filter(|name| resources.contains(name))
                .collect(),
            Err(e) => {
                tracing::warn!(resource = %self.name, "Ignoring stored create-after: {e}");
                BTreeSet::new()
            }
        }
    }

    pub fn index(&self) -> Option<i64> {
        self.get_int(attrs::INDEX).ok().flatten()
    }

    pub fn obsolete(&self) -> bool {
        self.get_bool(attrs::OBSOLETE).unwrap_or(false)
    }

    /// Apply `f` to the row inside its own transaction
    pub async fn update<T>(
        &self,
        f: impl FnOnce(&mut ResourceRecord) -> fleetops_state::Result<T>,
    ) -> Result<T> {
        let deployment = self.deployment;
        let id = self.id;
        let value = self
            .state
            .transact(|doc| f(doc.deployment_mut(&deployment)?.resource_mut(id)?))
            .await?;
        Ok(value)
    }

    pub async fn set_attr(&self, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        let value = value.into();
        self.update(|r| r.set_attr(key, value)).await
    }

    pub async fn set_attrs(&self, values: Vec<(&str, AttrValue)>) -> Result<()> {
        self.update(|r| r.set_attrs(values)).await
    }

    pub async fn remove_attrs(&self, keys: &[&str]) -> Result<()> {
        self.update(|r| {
            for key in keys {
                r.remove_attr(key);
            }
            Ok(())
        })
        .await
    }

    pub async fn set_state(&self, state: ResourceState) -> Result<()> {
        self.set_attr(attrs::STATE, state).await
    }

    /// Committed row of another resource in the same deployment
    pub fn peer(&self, name: &str) -> Option<ResourceRecord> {
        self.state.read(|doc| {
            doc.deployments
                .get(&self.deployment)
                .and_then(|d| d.find_resource(name).cloned())
        })
    }

    pub fn log(&self) -> ResourceLog {
        ResourceLog::new(self.name.clone(), self.index())
    }
}

/// A managed unit handled by one backend
#[async_trait]
pub trait Resource: Send + Sync {
    fn handle(&self) -> &ResourceHandle;

    fn name(&self) -> &str {
        self.handle().name()
    }

    fn resource_type(&self) -> &str {
        self.handle().resource_type()
    }

    /// Human readable type, e.g. including a region
    fn show_type(&self) -> String {
        self.resource_type().to_string()
    }

    fn as_machine(&self) -> Option<&dyn Machine> {
        None
    }

    /// Resources among `resources` whose creation must finish first.
    /// By default those listed under `depends-on`.
    fn create_after(
        &self,
        resources: &BTreeSet<String>,
        definition: &Definition,
    ) -> BTreeSet<String> {
        definition
            .depends_on()
            .into_iter()
            .filter(|name| resources.contains(name))
            .collect()
    }

    /// Resources among `resources` that may only be destroyed once this one
    /// is gone. By default the ones it was created after.
    fn destroy_before(&self, resources: &BTreeSet<String>) -> BTreeSet<String> {
        self.handle().recorded_create_after(resources)
    }

    /// Bring the resource in line with `definition`
    async fn create(&self, definition: &Definition, options: &CreateOptions) -> Result<()>;

    /// Destroy the remote object. Returns whether it is gone.
    async fn destroy(&self, wipe: bool) -> Result<bool>;

    async fn check(&self) -> Result<CheckResult> {
        let state = self.handle().state();
        Ok(CheckResult {
            state,
            exists: state != ResourceState::Missing,
            ..Default::default()
        })
    }

    /// React to a successfully activated configuration
    async fn after_activation(&self, _definition: &Definition) -> Result<()> {
        Ok(())
    }
}

impl Named for Arc<dyn Resource> {
    fn task_name(&self) -> String {
        self.name().to_string()
    }
}

/// A resource that receives configurations
#[async_trait]
pub trait Machine: Resource {
    /// Connection details for the transport
    fn target(&self) -> Result<Target>;

    /// Reboot the machine. Backends that can power-cycle override the hard
    /// variant.
    async fn reboot(&self, transport: &dyn Transport, hard: bool) -> Result<()> {
        if hard {
            self.handle()
                .log()
                .warn("hard reboot is not supported, rebooting normally");
        }
        let target = self.target()?;
        match transport
            .run_command(&target, "systemctl reboot || reboot")
            .await
        {
            Ok(_) => {}
            // the connection usually drops while the machine goes down
            Err(e) if e.is_connection_failure() => {}
            Err(e) => return Err(e.into()),
        }
        self.handle().set_state(ResourceState::Starting).await
    }

    /// Reboot and wait until the machine answers again
    async fn reboot_and_wait(
        &self,
        transport: &dyn Transport,
        hard: bool,
        wait: &WaitConfig,
    ) -> Result<()> {
        self.reboot(transport, hard).await?;
        let target = self.target()?;
        wait_for_reachable(transport, &target, wait).await?;
        self.handle().set_state(ResourceState::Up).await
    }

    async fn start(&self) -> Result<()> {
        Err(DeployError::unsupported(self.name(), "start"))
    }

    async fn stop(&self) -> Result<()> {
        Err(DeployError::unsupported(self.name(), "stop"))
    }

    async fn backup(&self, _backup_id: &str) -> Result<()> {
        Err(DeployError::unsupported(self.name(), "backup"))
    }

    async fn restore(&self, _backup_id: &str) -> Result<()> {
        Err(DeployError::unsupported(self.name(), "restore"))
    }
}
