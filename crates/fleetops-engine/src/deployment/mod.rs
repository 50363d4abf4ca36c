//! Deployment manager
//!
//! A [`Deployment`] owns the resource set of one deployment and drives it
//! through the deploy phases (evaluate, reconcile, index, create, build,
//! copy, activate, post-activation) and through destroy and the
//! operational commands. Each phase is a fan-out over resources through
//! the task runner; phases are strict barriers.

mod destroy;
mod lifecycle;
mod manage;
mod operations;
mod reconcile;

pub use destroy::DestroyReport;
pub use lifecycle::{
    ACTIVATE_COMMAND_KEY, DEFAULT_ACTIVATE_COMMAND, DeployOptions, DeployReport,
    REBOOT_REQUIRED_EXIT_CODE, REMOTE_CONFIG_DIR,
};
pub use manage::{DeploymentSpec, DeploymentSummary, list_deployments};
pub use operations::{CheckReport, ResourceInfo, import_deployment};
pub use reconcile::ReconcilePlan;

use crate::build::Builder;
use crate::error::{DeployError, Result};
use crate::parallel::Interrupt;
use crate::registry::PluginRegistry;
use crate::resource::{Resource, ResourceHandle};
use crate::transport::Transport;
use crate::wait::WaitConfig;
use fleetops_core::{Evaluation, Evaluator};
use fleetops_state::{DeploymentRecord, StateFile, keys};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Collaborators shared by every deployment of one process
#[derive(Clone)]
pub struct DeploymentContext {
    pub state: Arc<StateFile>,
    pub plugins: Arc<PluginRegistry>,
    pub evaluator: Arc<dyn Evaluator>,
    pub transport: Arc<dyn Transport>,
    pub builder: Arc<dyn Builder>,
    pub interrupt: Interrupt,
    pub wait: WaitConfig,
}

/// A loaded deployment and its resources
pub struct Deployment {
    ctx: DeploymentContext,
    uuid: Uuid,
    resources: BTreeMap<String, Arc<dyn Resource>>,
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("uuid", &self.uuid)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Deployment {
    /// Load the deployment `uuid` from the committed state
    pub fn load(ctx: DeploymentContext, uuid: Uuid) -> Result<Self> {
        let mut deployment = Self {
            ctx,
            uuid,
            resources: BTreeMap::new(),
        };
        deployment.reload()?;
        Ok(deployment)
    }

    /// Resolve `selector` (name or UUID), or the only deployment when no
    /// selector is given
    pub fn find(ctx: DeploymentContext, selector: Option<&str>) -> Result<Self> {
        let uuid = ctx.state.read(|doc| match selector {
            Some(selector) => doc.find_deployment(selector),
            None => doc.only_deployment().ok_or_else(|| {
                fleetops_state::StateError::DeploymentNotFound(
                    "no deployment selected and there is not exactly one".to_string(),
                )
            }),
        })?;
        Self::load(ctx, uuid)
    }

    /// Rebuild the resource objects from the committed state
    pub fn reload(&mut self) -> Result<()> {
        let record = self.record()?;
        let mut resources = BTreeMap::new();
        for row in record.resources.values() {
            let handle = ResourceHandle::new(self.ctx.state.clone(), self.uuid, row);
            let resource = self.ctx.plugins.backends.instantiate(handle)?;
            resources.insert(row.name.clone(), resource);
        }
        self.resources = resources;
        Ok(())
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.ctx
    }

    /// Committed copy of the deployment row
    pub fn record(&self) -> Result<DeploymentRecord> {
        Ok(self
            .ctx
            .state
            .read(|doc| doc.deployment(&self.uuid).cloned())?)
    }

    pub fn name(&self) -> Option<String> {
        self.record().ok().and_then(|r| r.name())
    }

    pub fn description(&self) -> Option<String> {
        self.record()
            .ok()
            .and_then(|r| r.get_str(keys::DESCRIPTION).map(str::to_string))
    }

    pub fn sources(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .record()?
            .get_json::<Vec<PathBuf>>(keys::SOURCES)?
            .unwrap_or_default())
    }

    pub fn args(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .record()?
            .get_json::<BTreeMap<String, String>>(keys::ARGS)?
            .unwrap_or_default())
    }

    pub fn rollback_enabled(&self) -> Result<bool> {
        Ok(self.record()?.get_bool(keys::ROLLBACK_ENABLED)?)
    }

    /// Every resource, obsolete ones included
    pub fn resources(&self) -> impl Iterator<Item = &Arc<dyn Resource>> {
        self.resources.values()
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<dyn Resource>> {
        self.resources.get(name)
    }

    /// Resources still present in the definitions
    pub fn active_resources(&self) -> Vec<Arc<dyn Resource>> {
        self.resources
            .values()
            .filter(|r| !r.handle().obsolete())
            .cloned()
            .collect()
    }

    /// Evaluate the deployment's sources with its arguments
    pub fn evaluate(&self) -> Result<Evaluation> {
        let sources = self.sources()?;
        let args = self.args()?;
        let evaluation = self.ctx.evaluator.evaluate(&sources, &args)?;
        Ok(evaluation)
    }

    /// Apply `f` to the deployment row inside its own transaction
    pub(crate) async fn update<T>(
        &self,
        f: impl FnOnce(&mut DeploymentRecord) -> Result<T>,
    ) -> Result<T> {
        let uuid = self.uuid;
        self.ctx
            .state
            .transact(|doc| f(doc.deployment_mut(&uuid)?))
            .await
    }

    /// Resources matching the include/exclude name filters
    fn select(
        &self,
        resources: impl IntoIterator<Item = Arc<dyn Resource>>,
        include: &[String],
        exclude: &[String],
    ) -> Vec<Arc<dyn Resource>> {
        resources
            .into_iter()
            .filter(|r| is_selected(r.name(), include, exclude))
            .collect()
    }

    fn all_resources(&self) -> Vec<Arc<dyn Resource>> {
        self.resources.values().cloned().collect()
    }

    /// Width of the longest resource name, for aligned output
    pub fn name_width(&self) -> usize {
        self.resources.keys().map(String::len).max().unwrap_or(0)
    }

    pub(crate) fn require(&self, name: &str) -> Result<&Arc<dyn Resource>> {
        self.resources
            .get(name)
            .ok_or_else(|| DeployError::ResourceNotFound(name.to_string()))
    }
}

/// An empty include list selects everything
pub fn is_selected(name: &str, include: &[String], exclude: &[String]) -> bool {
    (include.is_empty() || include.iter().any(|n| n == name)) && !exclude.iter().any(|n| n == name)
}
