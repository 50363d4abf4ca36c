//! The deploy pipeline

use super::{Deployment, DeploymentContext};
use crate::build::{BuildInput, BuildOutput};
use crate::error::{DeployError, Result};
use crate::parallel::{ParallelError, Workers, run_tasks};
use crate::resolver::{DependencyGraph, run_ordered};
use crate::resource::{CreateOptions, Resource, ResourceState, attrs};
use fleetops_core::Definition;
use fleetops_state::{AttrValue, keys};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Directory on the machines receiving copied configurations
pub const REMOTE_CONFIG_DIR: &str = "/var/lib/fleetops/configs";

/// Definition key overriding the activation command. `{config}` is replaced
/// with the remote path of the configuration.
pub const ACTIVATE_COMMAND_KEY: &str = "activate-command";

pub const DEFAULT_ACTIVATE_COMMAND: &str =
    "mkdir -p /var/lib/fleetops && ln -sfn {config} /var/lib/fleetops/current";

/// Exit code of the activation command asking for a reboot
pub const REBOOT_REQUIRED_EXIT_CODE: i32 = 100;

/// Machine attribute remembering the activation command
const ACTIVATE_COMMAND_ATTR: &str = "activateCommand";

#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Only evaluate and show the reconciliation plan
    pub dry_run: bool,
    pub build_only: bool,
    pub create_only: bool,
    pub copy_only: bool,
    pub check: bool,
    pub allow_reboot: bool,
    pub force_reboot: bool,
    pub allow_recreate: bool,
    /// Destroy obsolete resources before creating new ones
    pub kill_obsolete: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// `-1` means one worker per machine
    pub max_concurrent_copy: i64,
    pub max_concurrent_activate: i64,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            build_only: false,
            create_only: false,
            copy_only: false,
            check: false,
            allow_reboot: false,
            force_reboot: false,
            allow_recreate: false,
            kill_obsolete: false,
            include: Vec::new(),
            exclude: Vec::new(),
            max_concurrent_copy: 5,
            max_concurrent_activate: -1,
        }
    }
}

impl DeployOptions {
    /// Reject settings that would only fail after resources were changed
    pub fn validate(&self) -> Result<()> {
        for (flag, value) in [
            ("max-concurrent-copy", self.max_concurrent_copy),
            ("max-concurrent-activate", self.max_concurrent_activate),
        ] {
            if value == 0 {
                return Err(DeployError::InvalidOption(format!(
                    "{flag} must be at least 1, or -1 for no limit"
                )));
            }
        }
        Ok(())
    }

    fn create_options(&self) -> CreateOptions {
        CreateOptions {
            check: self.check,
            allow_reboot: self.allow_reboot,
            allow_recreate: self.allow_recreate,
        }
    }
}

/// What a deploy did
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub plan: super::ReconcilePlan,
    pub destroyed: Vec<String>,
    pub created: Vec<String>,
    pub build_id: Option<String>,
    pub copied: Vec<String>,
    pub activated: Vec<String>,
    pub generation: Option<i64>,
}

pub(super) fn remote_config_path(build_id: &str) -> String {
    format!("{REMOTE_CONFIG_DIR}/{build_id}.json")
}

impl Deployment {
    /// Drive the deployment to its definitions
    #[tracing::instrument(skip_all, fields(deployment = %self.uuid))]
    pub async fn deploy(&mut self, options: &DeployOptions) -> Result<DeployReport> {
        options.validate()?;
        let evaluation = self.evaluate()?;
        let mut report = DeployReport::default();

        if options.dry_run {
            report.plan = self.plan(&evaluation)?;
            return Ok(report);
        }

        report.plan = self.reconcile(&evaluation).await?;
        self.assign_indices().await?;

        if options.kill_obsolete {
            let obsolete: Vec<_> = self
                .all_resources()
                .into_iter()
                .filter(|r| r.handle().obsolete())
                .collect();
            let obsolete = self.select(obsolete, &options.include, &options.exclude);
            if !obsolete.is_empty() {
                report.destroyed = self.destroy_set(obsolete, false).await?.destroyed;
            }
        }

        let definitions = Arc::new(evaluation.definitions);
        let active = self.select(self.active_resources(), &options.include, &options.exclude);

        if !options.build_only {
            report.created = self
                .create_phase(active.clone(), definitions.clone(), options)
                .await?;
            if options.create_only {
                return Ok(report);
            }
        }

        let machines: Vec<Arc<dyn Resource>> = active
            .iter()
            .filter(|r| r.as_machine().is_some())
            .cloned()
            .collect();

        let build = self.build_phase(&machines, &definitions).await?;
        report.build_id = build.as_ref().map(|b| b.build_id.clone());
        if options.build_only {
            return Ok(report);
        }

        let Some(build) = build.map(Arc::new) else {
            // nothing to copy or activate
            self.post_activation(active, definitions).await?;
            return Ok(report);
        };

        report.copied = self.copy_phase(&machines, build.clone(), options).await?;
        if options.copy_only {
            return Ok(report);
        }

        let activation = self
            .activate_phase(&machines, build.clone(), definitions.clone(), options)
            .await;
        if let Err(ParallelError::Interrupted) = activation {
            return Err(DeployError::Interrupted);
        }
        let failed: BTreeSet<String> = match &activation {
            Ok(_) => BTreeSet::new(),
            Err(e) => e.failed_tasks().into_iter().map(str::to_string).collect(),
        };

        let survivors: Vec<_> = active
            .into_iter()
            .filter(|r| !failed.contains(r.name()))
            .collect();
        let post_activation = self.post_activation(survivors, definitions).await;

        let activated = activation?;
        post_activation?;
        report.activated = activated;

        if self.rollback_enabled()? {
            report.generation = Some(self.record_generation(&report.activated, &build).await?);
        }

        Ok(report)
    }

    /// Create every resource once its dependencies were created
    async fn create_phase(
        &self,
        resources: Vec<Arc<dyn Resource>>,
        definitions: Arc<BTreeMap<String, Definition>>,
        options: &DeployOptions,
    ) -> Result<Vec<String>> {
        self.record_create_after(&resources, &definitions).await?;
        let graph = DependencyGraph::for_create(&resources, &definitions);
        let create_options = options.create_options();
        let width = self.name_width();

        let created = run_ordered(resources, &graph, &self.ctx.interrupt, move |resource| {
            let definitions = definitions.clone();
            let create_options = create_options.clone();
            async move {
                let name = resource.name().to_string();
                let definition = definitions
                    .get(&name)
                    .ok_or_else(|| DeployError::ResourceNotFound(name.clone()))?;
                let log = resource.handle().log().with_width(width);
                if resource.handle().state() == ResourceState::Missing {
                    log.log(format!("creating {}...", resource.show_type()));
                }
                resource
                    .create(definition, &create_options)
                    .await
                    .inspect_err(|e| {
                        log.error(e.to_string());
                    })?;
                Ok(name)
            }
        })
        .await?;

        Ok(created)
    }

    /// Store what each resource is created after, so teardown can reverse it
    /// even for resources outside the current selection
    async fn record_create_after(
        &self,
        resources: &[Arc<dyn Resource>],
        definitions: &BTreeMap<String, Definition>,
    ) -> Result<()> {
        let present: BTreeSet<String> = self
            .active_resources()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        let edges: Vec<_> = resources
            .iter()
            .filter_map(|r| {
                let definition = definitions.get(r.name())?;
                let mut after = r.create_after(&present, definition);
                after.remove(r.name());
                Some((r.handle().id(), after))
            })
            .collect();
        self.update(|record| {
            for (id, after) in &edges {
                let row = record.resource_mut(*id)?;
                if after.is_empty() {
                    row.remove_attr(attrs::CREATE_AFTER);
                } else {
                    row.set_attr(attrs::CREATE_AFTER, AttrValue::json(after)?)?;
                }
            }
            Ok(())
        })
        .await
    }

    /// Build configurations for all machines in one call
    async fn build_phase(
        &self,
        machines: &[Arc<dyn Resource>],
        definitions: &BTreeMap<String, Definition>,
    ) -> Result<Option<BuildOutput>> {
        if machines.is_empty() {
            tracing::info!("No machines to build");
            return Ok(None);
        }

        let mut inputs = Vec::with_capacity(machines.len());
        for machine in machines {
            let definition = definitions
                .get(machine.name())
                .ok_or_else(|| DeployError::ResourceNotFound(machine.name().to_string()))?;
            inputs.push(BuildInput {
                machine: machine.name().to_string(),
                resource_type: machine.resource_type().to_string(),
                definition: definition.clone(),
                attrs: machine.handle().record()?.attrs,
            });
        }

        eprintln!("building configurations for {} machine(s)...", inputs.len());
        let output = self.ctx.builder.build(&inputs).await?;
        Ok(Some(output))
    }

    async fn copy_phase(
        &self,
        machines: &[Arc<dyn Resource>],
        build: Arc<BuildOutput>,
        options: &DeployOptions,
    ) -> Result<Vec<String>> {
        let ctx = self.ctx.clone();
        let width = self.name_width();
        let copied = run_tasks(
            Workers::from_setting(options.max_concurrent_copy),
            machines.to_vec(),
            &self.ctx.interrupt,
            move |resource: Arc<dyn Resource>| {
                let ctx = ctx.clone();
                let build = build.clone();
                async move {
                    let machine = resource
                        .as_machine()
                        .ok_or_else(|| DeployError::unsupported(resource.name(), "copy"))?;
                    let target = machine.target()?;
                    let log = resource.handle().log().with_width(width);
                    let artifact = build.artifact(resource.name())?;
                    let remote = remote_config_path(&build.build_id);

                    log.log("copying configuration...");
                    ctx.transport
                        .run_checked(&target, &format!("mkdir -p {REMOTE_CONFIG_DIR}"))
                        .await?;
                    ctx.transport
                        .upload_file(&target, artifact, &remote)
                        .await
                        .inspect_err(|e| log.error(e.to_string()))?;
                    Ok(resource.name().to_string())
                }
            },
        )
        .await?;
        Ok(copied)
    }

    async fn activate_phase(
        &self,
        machines: &[Arc<dyn Resource>],
        build: Arc<BuildOutput>,
        definitions: Arc<BTreeMap<String, Definition>>,
        options: &DeployOptions,
    ) -> std::result::Result<Vec<String>, ParallelError<DeployError>> {
        let ctx = self.ctx.clone();
        let options = options.clone();
        let width = self.name_width();
        run_tasks(
            Workers::from_setting(options.max_concurrent_activate),
            machines.to_vec(),
            &self.ctx.interrupt,
            move |resource: Arc<dyn Resource>| {
                let ctx = ctx.clone();
                let build = build.clone();
                let definitions = definitions.clone();
                let options = options.clone();
                async move {
                    let command = definitions
                        .get(resource.name())
                        .and_then(|d| d.get_str(ACTIVATE_COMMAND_KEY))
                        .unwrap_or(DEFAULT_ACTIVATE_COMMAND)
                        .to_string();
                    let remote = remote_config_path(&build.build_id);
                    activate_machine(&ctx, &resource, &remote, &command, &options, width).await?;
                    Ok(resource.name().to_string())
                }
            },
        )
        .await
    }

    /// Let every resource react to the applied configuration
    async fn post_activation(
        &self,
        resources: Vec<Arc<dyn Resource>>,
        definitions: Arc<BTreeMap<String, Definition>>,
    ) -> Result<()> {
        run_tasks(
            Workers::PerTask,
            resources,
            &self.ctx.interrupt,
            move |resource: Arc<dyn Resource>| {
                let definitions = definitions.clone();
                async move {
                    match definitions.get(resource.name()) {
                        Some(definition) => resource.after_activation(definition).await,
                        None => Ok(()),
                    }
                }
            },
        )
        .await?;
        Ok(())
    }

    /// Record the activated configurations as a new generation
    async fn record_generation(&self, machines: &[String], build: &BuildOutput) -> Result<i64> {
        let remote = remote_config_path(&build.build_id);
        let generation = self
            .update(|record| {
                let generation = record.get_int(keys::GENERATION)?.unwrap_or(0) + 1;
                for name in machines {
                    let Some(row) = record.find_resource_mut(name) else {
                        continue;
                    };
                    let mut generations: BTreeMap<String, String> =
                        row.get_json(attrs::GENERATIONS)?.unwrap_or_default();
                    generations.insert(generation.to_string(), remote.clone());
                    row.set_attr(attrs::GENERATIONS, AttrValue::json(&generations)?)?;
                }
                record.set_attr(keys::GENERATION, generation)?;
                Ok(generation)
            })
            .await?;
        tracing::info!(generation, "Recorded generation");
        Ok(generation)
    }
}

/// Switch one machine to the configuration at `remote`
pub(super) async fn activate_machine(
    ctx: &DeploymentContext,
    resource: &Arc<dyn Resource>,
    remote: &str,
    command: &str,
    options: &DeployOptions,
    width: usize,
) -> Result<()> {
    let machine = resource
        .as_machine()
        .ok_or_else(|| DeployError::unsupported(resource.name(), "activate"))?;
    let target = machine.target()?;
    let log = resource.handle().log().with_width(width);

    log.log("activating new configuration...");
    let output = ctx
        .transport
        .run_command(&target, &command.replace("{config}", remote))
        .await?;

    match output.exit_code {
        0 => {}
        REBOOT_REQUIRED_EXIT_CODE => {
            if !options.allow_reboot {
                log.warn("the new configuration requires a reboot");
                return Err(DeployError::RebootRequired {
                    machine: resource.name().to_string(),
                });
            }
            log.log("rebooting to apply the new configuration...");
            machine
                .reboot_and_wait(ctx.transport.as_ref(), false, &ctx.wait)
                .await?;
        }
        exit_code => {
            if !output.stderr.trim().is_empty() {
                log.error(output.stderr.trim());
            }
            log.error(format!("activation failed with exit code {exit_code}"));
            return Err(DeployError::Activation {
                machine: resource.name().to_string(),
                exit_code,
            });
        }
    }

    if options.force_reboot {
        log.log("rebooting...");
        machine
            .reboot_and_wait(ctx.transport.as_ref(), false, &ctx.wait)
            .await?;
    }

    resource
        .handle()
        .set_attrs(vec![
            (attrs::CURRENT_CONFIG, AttrValue::from(remote)),
            (ACTIVATE_COMMAND_ATTR, AttrValue::from(command)),
            (attrs::STATE, AttrValue::from(ResourceState::Up)),
        ])
        .await?;
    log.success("activation finished");
    Ok(())
}

pub(super) fn stored_activate_command(resource: &Arc<dyn Resource>) -> String {
    resource
        .handle()
        .get_str(ACTIVATE_COMMAND_ATTR)
        .unwrap_or_else(|| DEFAULT_ACTIVATE_COMMAND.to_string())
}
