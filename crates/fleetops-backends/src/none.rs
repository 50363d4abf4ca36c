//! `none` backend: a machine fleetops did not create
//!
//! The machine already exists and is reached at `target-host`. Creating it
//! only records the connection details; destroying it forgets them.

use crate::probe::probe_machine;
use async_trait::async_trait;
use fleetops_core::Definition;
use fleetops_engine::resource::attrs;
use fleetops_engine::{
    CheckResult, CreateOptions, DeployError, Machine, Resource, ResourceHandle, ResourceState,
    Result, Target, Transport,
};
use fleetops_state::AttrValue;
use std::sync::Arc;

pub const RESOURCE_TYPE: &str = "none";

pub const TARGET_HOST: &str = "targetHost";
pub const TARGET_USER: &str = "targetUser";
pub const TARGET_PORT: &str = "targetPort";

pub struct NoneMachine {
    handle: ResourceHandle,
    transport: Arc<dyn Transport>,
}

impl NoneMachine {
    pub fn new(handle: ResourceHandle, transport: Arc<dyn Transport>) -> Self {
        Self { handle, transport }
    }
}

/// Connection details as stored on a machine row
pub(crate) fn stored_target(handle: &ResourceHandle, host_attr: &str) -> Result<Target> {
    let host = handle.get_str(host_attr).ok_or_else(|| {
        DeployError::backend(handle.name(), "no known address yet, deploy it first")
    })?;
    let mut target = Target::new(handle.name(), host);
    if let Some(user) = handle.get_str(TARGET_USER) {
        target.user = user;
    }
    if let Some(port) = handle.get_int(TARGET_PORT)? {
        target.port = u16::try_from(port).map_err(|_| {
            DeployError::backend(handle.name(), format!("{port} is not a valid port"))
        })?;
    }
    Ok(target)
}

#[async_trait]
impl Resource for NoneMachine {
    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn as_machine(&self) -> Option<&dyn Machine> {
        Some(self)
    }

    fn show_type(&self) -> String {
        match self.handle.get_str(TARGET_HOST) {
            Some(host) => format!("{RESOURCE_TYPE} [{host}]"),
            None => RESOURCE_TYPE.to_string(),
        }
    }

    async fn create(&self, definition: &Definition, _options: &CreateOptions) -> Result<()> {
        let host = definition.get_str("target-host").ok_or_else(|| {
            DeployError::backend(self.name(), "`target-host` is required for this backend")
        })?;
        let mut values = vec![(TARGET_HOST, AttrValue::from(host))];
        if let Some(user) = definition.get_str("target-user") {
            values.push((TARGET_USER, AttrValue::from(user)));
        }
        if let Some(port) = definition.get_i64("target-port") {
            values.push((TARGET_PORT, AttrValue::from(port)));
        }
        if self.handle.state() == ResourceState::Missing {
            values.push((attrs::STATE, AttrValue::from(ResourceState::Up)));
        }
        self.handle.set_attrs(values).await
    }

    async fn destroy(&self, _wipe: bool) -> Result<bool> {
        self.handle
            .log()
            .warn("machine was not created by fleetops, only forgetting it");
        Ok(true)
    }

    async fn check(&self) -> Result<CheckResult> {
        if self.handle.get_str(TARGET_HOST).is_none() {
            return Ok(CheckResult::default());
        }
        let target = self.target()?;
        Ok(probe_machine(self.transport.as_ref(), &target, &self.handle).await)
    }
}

#[async_trait]
impl Machine for NoneMachine {
    fn target(&self) -> Result<Target> {
        stored_target(&self.handle, TARGET_HOST)
    }
}
