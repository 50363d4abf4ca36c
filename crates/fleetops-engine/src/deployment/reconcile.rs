//! Reconciling stored resources with evaluated definitions

use super::Deployment;
use crate::error::{DeployError, Result};
use crate::registry::BackendRegistry;
use crate::resource::attrs;
use fleetops_core::Evaluation;
use fleetops_state::{DeploymentRecord, keys};

/// Changes reconciliation makes to the resource set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// New rows as `(name, type)`
    pub create: Vec<(String, String)>,
    /// Rows no longer defined
    pub obsolete: Vec<String>,
    /// Obsolete rows defined again
    pub revived: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.obsolete.is_empty() && self.revived.is_empty()
    }
}

fn plan_for(
    record: &DeploymentRecord,
    evaluation: &Evaluation,
    registry: &BackendRegistry,
) -> Result<ReconcilePlan> {
    let mut plan = ReconcilePlan::default();

    for definition in evaluation.definitions.values() {
        match record.find_resource(&definition.name) {
            Some(row) => {
                if row.resource_type != definition.resource_type {
                    return Err(DeployError::TypeChanged {
                        name: definition.name.clone(),
                        stored: row.resource_type.clone(),
                        declared: definition.resource_type.clone(),
                    });
                }
                if row.get_bool(attrs::OBSOLETE)? {
                    plan.revived.push(definition.name.clone());
                }
            }
            None => {
                if !registry.is_registered(&definition.resource_type) {
                    return Err(DeployError::UnknownResourceType {
                        name: definition.name.clone(),
                        resource_type: definition.resource_type.clone(),
                    });
                }
                plan.create
                    .push((definition.name.clone(), definition.resource_type.clone()));
            }
        }
    }

    for row in record.resources.values() {
        if !evaluation.definitions.contains_key(&row.name) && !row.get_bool(attrs::OBSOLETE)? {
            plan.obsolete.push(row.name.clone());
        }
    }

    Ok(plan)
}

impl Deployment {
    /// What [`Deployment::reconcile`] would change, without changing it
    pub fn plan(&self, evaluation: &Evaluation) -> Result<ReconcilePlan> {
        plan_for(&self.record()?, evaluation, &self.ctx.plugins.backends)
    }

    /// Create rows for new definitions and flag rows that are no longer
    /// defined as obsolete. Running it twice with the same definitions
    /// changes nothing the second time.
    #[tracing::instrument(skip_all, fields(deployment = %self.uuid))]
    pub async fn reconcile(&mut self, evaluation: &Evaluation) -> Result<ReconcilePlan> {
        let registry = &self.ctx.plugins.backends;
        let plan = self
            .update(|record| {
                let plan = plan_for(record, evaluation, registry)?;

                for (name, resource_type) in &plan.create {
                    record.create_resource(name, resource_type)?;
                }
                for name in &plan.obsolete {
                    if let Some(row) = record.find_resource_mut(name) {
                        row.set_attr(attrs::OBSOLETE, true)?;
                    }
                }
                for name in &plan.revived {
                    if let Some(row) = record.find_resource_mut(name) {
                        row.remove_attr(attrs::OBSOLETE);
                    }
                }

                if let Some(description) = &evaluation.network.description {
                    record.set_attr(keys::DESCRIPTION, description.as_str())?;
                }
                if let Some(enabled) = evaluation.network.rollback_enabled {
                    record.set_attr(keys::ROLLBACK_ENABLED, enabled)?;
                }
                Ok(plan)
            })
            .await?;

        for (name, resource_type) in &plan.create {
            tracing::info!(resource = %name, resource_type = %resource_type, "Added resource");
        }
        for name in &plan.obsolete {
            tracing::warn!(resource = %name, "Resource is obsolete");
        }

        self.reload()?;
        Ok(plan)
    }

    /// Give every active resource without an index the next free one.
    /// Indices are never reused, even after the resource holding one was
    /// destroyed.
    pub async fn assign_indices(&mut self) -> Result<Vec<(String, i64)>> {
        let assigned = self
            .update(|record| {
                let mut highest: Option<i64> = None;
                for row in record.resources.values() {
                    if let Some(index) = row.get_int(attrs::INDEX)? {
                        highest = Some(highest.map_or(index, |h| h.max(index)));
                    }
                }
                let mut next = highest
                    .map_or(0, |h| h + 1)
                    .max(record.get_int(keys::NEXT_INDEX)?.unwrap_or(0));

                let mut assigned = Vec::new();
                // rows are keyed by id, so this is creation order
                for row in record.resources.values_mut() {
                    if row.get_bool(attrs::OBSOLETE)? || row.get_int(attrs::INDEX)?.is_some() {
                        continue;
                    }
                    row.set_attr(attrs::INDEX, next)?;
                    assigned.push((row.name.clone(), next));
                    next += 1;
                }
                record.set_attr(keys::NEXT_INDEX, next)?;
                Ok(assigned)
            })
            .await?;

        for (name, index) in &assigned {
            tracing::debug!(resource = %name, index, "Assigned index");
        }
        Ok(assigned)
    }
}
