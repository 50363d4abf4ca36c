//! Operational commands fanned out over resources

use super::Deployment;
use super::lifecycle::{DeployOptions, activate_machine, stored_activate_command};
use crate::error::{DeployError, Result};
use crate::parallel::{Workers, run_tasks};
use crate::registry::BackendRegistry;
use crate::resource::{CheckResult, Resource, ResourceState, attrs};
use chrono::Utc;
use fleetops_state::{AttrValue, DeploymentRecord, StateFile, keys};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Per-resource results of a check
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub results: BTreeMap<String, CheckResult>,
    /// Resources whose check itself failed
    pub errors: BTreeMap<String, String>,
}

impl CheckReport {
    /// Exit code bit flags: 2 = some resource is not up, 4 = some resource
    /// is unreachable, 8 = some configuration is outdated
    pub fn exit_code(&self) -> i32 {
        let mut code = 0;
        for result in self.results.values() {
            if result.state != ResourceState::Up {
                code |= 2;
            }
            if result.is_reachable == Some(false) || result.state == ResourceState::Unreachable {
                code |= 4;
            }
            if result.is_outdated {
                code |= 8;
            }
        }
        if !self.errors.is_empty() {
            code |= 2;
        }
        code
    }
}

/// One line of `info`
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub name: String,
    pub state: ResourceState,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub obsolete: bool,
    pub index: Option<i64>,
}

impl Deployment {
    fn machines(&self, include: &[String], exclude: &[String]) -> Vec<Arc<dyn Resource>> {
        let machines = self
            .active_resources()
            .into_iter()
            .filter(|r| r.as_machine().is_some());
        self.select(machines, include, exclude)
    }

    /// Check every selected resource and store the observed state
    pub async fn check(&self, include: &[String], exclude: &[String]) -> Result<CheckReport> {
        let targets = self.select(self.all_resources(), include, exclude);
        let outcomes = run_tasks(
            Workers::PerTask,
            targets,
            &self.ctx.interrupt,
            |resource: Arc<dyn Resource>| async move {
                let outcome = match resource.check().await {
                    Ok(result) => {
                        resource.handle().set_state(result.state).await?;
                        Ok(result)
                    }
                    Err(e) => Err(e.to_string()),
                };
                Ok::<_, DeployError>((resource.name().to_string(), outcome))
            },
        )
        .await?;

        let mut report = CheckReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    report.results.insert(name, result);
                }
                Err(message) => {
                    report.errors.insert(name, message);
                }
            }
        }
        Ok(report)
    }

    pub async fn start_machines(&self, include: &[String], exclude: &[String]) -> Result<()> {
        let machines = self.machines(include, exclude);
        run_tasks(
            Workers::PerTask,
            machines,
            &self.ctx.interrupt,
            |resource: Arc<dyn Resource>| async move {
                let machine = resource
                    .as_machine()
                    .ok_or_else(|| DeployError::unsupported(resource.name(), "start"))?;
                resource.handle().log().log("starting...");
                machine.start().await
            },
        )
        .await?;
        Ok(())
    }

    pub async fn stop_machines(&self, include: &[String], exclude: &[String]) -> Result<()> {
        let machines = self.machines(include, exclude);
        run_tasks(
            Workers::PerTask,
            machines,
            &self.ctx.interrupt,
            |resource: Arc<dyn Resource>| async move {
                let machine = resource
                    .as_machine()
                    .ok_or_else(|| DeployError::unsupported(resource.name(), "stop"))?;
                resource.handle().log().log("stopping...");
                machine.stop().await
            },
        )
        .await?;
        Ok(())
    }

    /// Reboot the selected machines and wait until they answer again
    pub async fn reboot_machines(
        &self,
        include: &[String],
        exclude: &[String],
        hard: bool,
    ) -> Result<()> {
        let machines = self.machines(include, exclude);
        let ctx = self.ctx.clone();
        run_tasks(
            Workers::PerTask,
            machines,
            &self.ctx.interrupt,
            move |resource: Arc<dyn Resource>| {
                let ctx = ctx.clone();
                async move {
                    let machine = resource
                        .as_machine()
                        .ok_or_else(|| DeployError::unsupported(resource.name(), "reboot"))?;
                    resource.handle().log().log("rebooting...");
                    machine
                        .reboot_and_wait(ctx.transport.as_ref(), hard, &ctx.wait)
                        .await
                }
            },
        )
        .await?;
        Ok(())
    }

    /// Back up the selected machines under a fresh backup id
    pub async fn backup(&self, include: &[String], exclude: &[String]) -> Result<String> {
        let backup_id = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let machines = self.machines(include, exclude);
        let id = backup_id.clone();
        run_tasks(
            Workers::PerTask,
            machines,
            &self.ctx.interrupt,
            move |resource: Arc<dyn Resource>| {
                let backup_id = id.clone();
                async move {
                    let machine = resource
                        .as_machine()
                        .ok_or_else(|| DeployError::unsupported(resource.name(), "backup"))?;
                    resource
                        .handle()
                        .log()
                        .log(format!("backing up as {backup_id}..."));
                    machine.backup(&backup_id).await?;
                    resource
                        .handle()
                        .update(|row| {
                            let mut backups: Vec<String> =
                                row.get_json(attrs::BACKUPS)?.unwrap_or_default();
                            backups.push(backup_id.clone());
                            row.set_attr(attrs::BACKUPS, AttrValue::json(&backups)?)
                        })
                        .await
                }
            },
        )
        .await?;
        Ok(backup_id)
    }

    /// Backup ids recorded per machine
    pub fn backups(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut all = BTreeMap::new();
        for resource in self.resources() {
            if let Some(backups) = resource.handle().get_json::<Vec<String>>(attrs::BACKUPS)? {
                all.insert(resource.name().to_string(), backups);
            }
        }
        Ok(all)
    }

    pub async fn restore(
        &self,
        include: &[String],
        exclude: &[String],
        backup_id: &str,
    ) -> Result<()> {
        let machines = self.machines(include, exclude);
        let id = backup_id.to_string();
        run_tasks(
            Workers::PerTask,
            machines,
            &self.ctx.interrupt,
            move |resource: Arc<dyn Resource>| {
                let backup_id = id.clone();
                async move {
                    let machine = resource
                        .as_machine()
                        .ok_or_else(|| DeployError::unsupported(resource.name(), "restore"))?;
                    let known: Vec<String> = resource
                        .handle()
                        .get_json(attrs::BACKUPS)?
                        .unwrap_or_default();
                    if !known.contains(&backup_id) {
                        return Err(DeployError::BackupNotFound {
                            machine: resource.name().to_string(),
                            backup_id,
                        });
                    }
                    resource
                        .handle()
                        .log()
                        .log(format!("restoring backup {backup_id}..."));
                    machine.restore(&backup_id).await
                }
            },
        )
        .await?;
        Ok(())
    }

    /// Re-activate the configurations recorded for `generation`
    pub async fn rollback(&self, generation: i64, options: &DeployOptions) -> Result<Vec<String>> {
        options.validate()?;
        if !self.rollback_enabled()? {
            return Err(DeployError::InvalidOption(
                "rollback is not enabled for this deployment".to_string(),
            ));
        }

        let machines: Vec<(Arc<dyn Resource>, String)> = self
            .machines(&options.include, &options.exclude)
            .into_iter()
            .filter_map(|resource| {
                let generations: BTreeMap<String, String> = resource
                    .handle()
                    .get_json(attrs::GENERATIONS)
                    .ok()
                    .flatten()?;
                let path = generations.get(&generation.to_string())?.clone();
                Some((resource, path))
            })
            .collect();
        if machines.is_empty() {
            return Err(DeployError::GenerationNotFound(generation));
        }

        let paths: BTreeMap<String, String> = machines
            .iter()
            .map(|(r, p)| (r.name().to_string(), p.clone()))
            .collect();
        let resources: Vec<Arc<dyn Resource>> = machines.into_iter().map(|(r, _)| r).collect();
        let ctx = self.ctx.clone();
        let options = options.clone();
        let paths = Arc::new(paths);
        let width = self.name_width();

        let switched = run_tasks(
            Workers::from_setting(options.max_concurrent_activate),
            resources,
            &self.ctx.interrupt,
            move |resource: Arc<dyn Resource>| {
                let ctx = ctx.clone();
                let options = options.clone();
                let paths = paths.clone();
                async move {
                    let remote = paths
                        .get(resource.name())
                        .ok_or(DeployError::GenerationNotFound(generation))?;
                    let command = stored_activate_command(&resource);
                    activate_machine(&ctx, &resource, remote, &command, &options, width).await?;
                    Ok(resource.name().to_string())
                }
            },
        )
        .await?;

        tracing::info!(generation, machines = switched.len(), "Rolled back");
        Ok(switched)
    }

    /// Rename a resource, keeping its id, type, index and attributes
    pub async fn rename_resource(&mut self, from: &str, to: &str) -> Result<()> {
        self.require(from)?;
        self.update(|record| {
            record.rename_resource(from, to)?;
            // keep teardown ordering of the dependents
            for row in record.resources.values_mut() {
                let Ok(Some(mut after)) = row.get_json::<BTreeSet<String>>(attrs::CREATE_AFTER)
                else {
                    continue;
                };
                if after.remove(from) {
                    after.insert(to.to_string());
                    row.set_attr(attrs::CREATE_AFTER, AttrValue::json(&after)?)?;
                }
            }
            Ok(())
        })
        .await?;
        self.reload()
    }

    /// Forget resources without destroying them
    pub async fn delete_resources(&mut self, names: &[String]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push((name.clone(), self.require(name)?.handle().id()));
        }
        let removed = self
            .update(|record| {
                let mut removed = Vec::new();
                for (name, id) in &ids {
                    if record.remove_resource(*id).is_some() {
                        removed.push(name.clone());
                    }
                }
                Ok(removed)
            })
            .await?;
        self.reload()?;
        Ok(removed)
    }

    pub async fn set_arg(&self, key: &str, value: &str) -> Result<()> {
        self.update(|record| {
            let mut args: BTreeMap<String, String> =
                record.get_json(keys::ARGS)?.unwrap_or_default();
            args.insert(key.to_string(), value.to_string());
            Ok(record.set_attr(keys::ARGS, AttrValue::json(&args)?)?)
        })
        .await
    }

    pub async fn unset_arg(&self, key: &str) -> Result<bool> {
        self.update(|record| {
            let mut args: BTreeMap<String, String> =
                record.get_json(keys::ARGS)?.unwrap_or_default();
            let removed = args.remove(key).is_some();
            record.set_attr(keys::ARGS, AttrValue::json(&args)?)?;
            Ok(removed)
        })
        .await
    }

    /// Resources ordered by index, unindexed ones last
    pub fn info(&self) -> Vec<ResourceInfo> {
        let mut infos: Vec<ResourceInfo> = self
            .resources()
            .map(|r| ResourceInfo {
                name: r.name().to_string(),
                state: r.handle().state(),
                resource_type: r.show_type(),
                obsolete: r.handle().obsolete(),
                index: r.handle().index(),
            })
            .collect();
        infos.sort_by(|a, b| {
            (a.index.is_none(), a.index, &a.name).cmp(&(b.index.is_none(), b.index, &b.name))
        });
        infos
    }

    /// The deployment row as JSON
    pub fn export(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.record()?)?)
    }
}

/// Store an exported deployment. Keeps its UUID unless that is taken.
/// Rows are checked like freshly created ones and every type must have a
/// backend in `backends`.
pub async fn import_deployment(
    state: &StateFile,
    backends: &BackendRegistry,
    exported: serde_json::Value,
) -> Result<Uuid> {
    let mut record: DeploymentRecord = serde_json::from_value(exported)?;
    record.check_consistency()?;
    if let Some(row) = record
        .resources
        .values()
        .find(|row| !backends.is_registered(&row.resource_type))
    {
        return Err(DeployError::UnknownResourceType {
            name: row.name.clone(),
            resource_type: row.resource_type.clone(),
        });
    }
    let uuid = state
        .transact(|doc| -> Result<Uuid> {
            if doc.deployments.contains_key(&record.uuid) {
                let fresh = Uuid::new_v4();
                tracing::warn!(
                    "Deployment {} already exists, importing as {}",
                    record.uuid,
                    fresh
                );
                record.uuid = fresh;
            }
            let uuid = record.uuid;
            if let Some(highest) = record.resources.keys().max() {
                record.next_resource_id = record.next_resource_id.max(highest + 1);
            }
            doc.deployments.insert(uuid, record);
            Ok(uuid)
        })
        .await?;
    Ok(uuid)
}
