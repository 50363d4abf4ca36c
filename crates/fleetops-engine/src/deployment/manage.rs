//! Creating, modifying, cloning and deleting deployments

use super::{Deployment, DeploymentContext};
use crate::error::{DeployError, Result};
use fleetops_state::{AttrValue, DeploymentRecord, StateFile, keys};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// User-supplied deployment attributes
#[derive(Debug, Clone, Default)]
pub struct DeploymentSpec {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sources: Vec<PathBuf>,
}

impl DeploymentSpec {
    fn apply(&self, record: &mut DeploymentRecord) -> fleetops_state::Result<()> {
        if let Some(name) = &self.name {
            record.set_attr(keys::NAME, name.as_str())?;
        }
        if let Some(description) = &self.description {
            record.set_attr(keys::DESCRIPTION, description.as_str())?;
        }
        if !self.sources.is_empty() {
            let sources: Vec<PathBuf> = self
                .sources
                .iter()
                .map(|p| std::path::absolute(p).unwrap_or_else(|_| p.clone()))
                .collect();
            record.set_attr(keys::SOURCES, AttrValue::json(&sources)?)?;
        }
        Ok(())
    }
}

/// One line of `list`
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub resources: usize,
}

/// Every deployment in the state file
pub fn list_deployments(state: &StateFile) -> Vec<DeploymentSummary> {
    state.read(|doc| {
        doc.deployments
            .values()
            .map(|d| DeploymentSummary {
                uuid: d.uuid,
                name: d.name(),
                description: d.get_str(keys::DESCRIPTION).map(str::to_string),
                resources: d.resources.len(),
            })
            .collect()
    })
}

impl Deployment {
    /// Create a new, empty deployment
    pub async fn create(ctx: DeploymentContext, spec: &DeploymentSpec) -> Result<Self> {
        let uuid = ctx
            .state
            .transact(|doc| -> Result<Uuid> {
                if let Some(name) = &spec.name
                    && doc.find_deployment(name).is_ok()
                {
                    tracing::warn!("Another deployment is already named '{}'", name);
                }
                let uuid = doc.create_deployment();
                spec.apply(doc.deployment_mut(&uuid)?)?;
                Ok(uuid)
            })
            .await?;
        tracing::info!(%uuid, "Created deployment");
        Self::load(ctx, uuid)
    }

    /// Change the name, description or sources
    pub async fn modify(&mut self, spec: &DeploymentSpec) -> Result<()> {
        self.update(|record| Ok(spec.apply(record)?)).await
    }

    /// Copy the deployment's attributes, not its resources, into a new one
    pub async fn clone_as(&self, name: Option<String>) -> Result<Self> {
        let source = self.record()?;
        let uuid = self
            .ctx
            .state
            .transact(|doc| -> Result<Uuid> {
                let uuid = doc.create_deployment();
                let record = doc.deployment_mut(&uuid)?;
                record.attrs = source.attrs.clone();
                record.remove_attr(keys::GENERATION);
                record.remove_attr(keys::NEXT_INDEX);
                match &name {
                    Some(name) => record.set_attr(keys::NAME, name.as_str())?,
                    None => {
                        record.remove_attr(keys::NAME);
                    }
                }
                Ok(uuid)
            })
            .await?;
        tracing::info!(from = %self.uuid, to = %uuid, "Cloned deployment");
        Self::load(self.ctx.clone(), uuid)
    }

    /// Remove the deployment. Refused while resources remain unless `force`,
    /// which forgets them without destroying anything.
    pub async fn delete(self, force: bool) -> Result<()> {
        let uuid = self.uuid;
        self.ctx
            .state
            .transact(|doc| -> Result<()> {
                doc.delete_deployment(&uuid, force)
                    .map_err(DeployError::from)?;
                Ok(())
            })
            .await?;
        tracing::info!(%uuid, "Deleted deployment");
        Ok(())
    }
}
