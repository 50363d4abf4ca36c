use async_trait::async_trait;
use fleetops_core::{Definition, EvalError, Evaluation, Evaluator};
use fleetops_engine::resource::attrs;
use fleetops_engine::{
    BundleBuilder, CheckResult, CommandOutput, CreateOptions, DeployError, Deployment,
    DeploymentContext, DeploymentSpec, Interrupt, Machine, Plugin, PluginRegistry, Resource,
    ResourceHandle, ResourceState, Result, Target, Transport, TransportError, WaitConfig,
};
use fleetops_state::{AttrValue, StateFile};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const FAKE: &str = "fake";
pub const FAKE_MACHINE: &str = "fake-machine";

/// Ordered record of backend calls shared by every fake resource
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("`{entry}` not in {:?}", self.entries()))
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Resource whose behaviour is driven by its definition:
/// `fail`, `delay-ms`, `keep` and `destroy-before`, on top of `depends-on`
pub struct FakeResource {
    handle: ResourceHandle,
    calls: CallLog,
    transport: Arc<FakeTransport>,
    machine: bool,
}

#[async_trait]
impl Resource for FakeResource {
    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn as_machine(&self) -> Option<&dyn Machine> {
        if self.machine {
            Some(self as &dyn Machine)
        } else {
            None
        }
    }

    fn destroy_before(&self, resources: &BTreeSet<String>) -> BTreeSet<String> {
        let mut names = self.handle.recorded_create_after(resources);
        names.extend(
            self.handle
                .get_json::<Vec<String>>("destroyBefore")
                .ok()
                .flatten()
                .unwrap_or_default()
                .into_iter()
                .filter(|name| resources.contains(name)),
        );
        names
    }

    async fn create(&self, definition: &Definition, _options: &CreateOptions) -> Result<()> {
        let name = self.name().to_string();
        self.calls.push(format!("create-start:{name}"));
        if let Some(ms) = definition.get_i64("delay-ms") {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }
        if let Some(message) = definition.get_str("fail") {
            self.calls.push(format!("create-failed:{name}"));
            return Err(DeployError::backend(name, message));
        }
        self.handle
            .set_attrs(vec![
                (attrs::STATE, AttrValue::from(ResourceState::Up)),
                ("keep", AttrValue::from(definition.get_bool("keep").unwrap_or(false))),
                (
                    "destroyBefore",
                    AttrValue::json(&definition.get_list("destroy-before"))?,
                ),
            ])
            .await?;
        self.calls.push(format!("create-end:{name}"));
        Ok(())
    }

    async fn destroy(&self, _wipe: bool) -> Result<bool> {
        self.calls.push(format!("destroy:{}", self.name()));
        Ok(!self.handle.get_bool("keep")?)
    }

    async fn check(&self) -> Result<CheckResult> {
        let state = self.handle.state();
        if !self.machine || state == ResourceState::Missing {
            return Ok(CheckResult {
                state,
                exists: state != ResourceState::Missing,
                ..Default::default()
            });
        }
        let reachable = self
            .transport
            .run_command(&self.target()?, "true")
            .await
            .is_ok();
        Ok(CheckResult {
            state: if reachable {
                state
            } else {
                ResourceState::Unreachable
            },
            exists: true,
            is_reachable: Some(reachable),
            ..Default::default()
        })
    }

    async fn after_activation(&self, _definition: &Definition) -> Result<()> {
        self.calls.push(format!("post:{}", self.name()));
        Ok(())
    }
}

#[async_trait]
impl Machine for FakeResource {
    fn target(&self) -> Result<Target> {
        Ok(Target::new(self.name(), host_of(self.name())))
    }

    async fn backup(&self, backup_id: &str) -> Result<()> {
        self.calls.push(format!("backup:{}:{backup_id}", self.name()));
        Ok(())
    }

    async fn restore(&self, backup_id: &str) -> Result<()> {
        self.calls.push(format!("restore:{}:{backup_id}", self.name()));
        Ok(())
    }
}

pub fn host_of(machine: &str) -> String {
    format!("{machine}.test")
}

/// Records commands and uploads; activation exit codes are scripted per host
#[derive(Default)]
pub struct FakeTransport {
    commands: Mutex<Vec<(String, String)>>,
    uploads: Mutex<Vec<(String, String)>>,
    activation_exits: Mutex<BTreeMap<String, VecDeque<i32>>>,
    unreachable: Mutex<BTreeSet<String>>,
}

impl FakeTransport {
    /// Exit codes returned by the next activation commands on `machine`
    pub fn script_activation(&self, machine: &str, exit_codes: &[i32]) {
        self.activation_exits
            .lock()
            .unwrap()
            .insert(host_of(machine), exit_codes.iter().copied().collect());
    }

    pub fn set_unreachable(&self, machine: &str) {
        self.unreachable.lock().unwrap().insert(host_of(machine));
    }

    pub fn commands_on(&self, machine: &str) -> Vec<String> {
        let host = host_of(machine);
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

fn is_activation(command: &str) -> bool {
    command.contains("/var/lib/fleetops/current")
}

#[async_trait]
impl Transport for FakeTransport {
    async fn run_command(
        &self,
        target: &Target,
        command: &str,
    ) -> std::result::Result<CommandOutput, TransportError> {
        if self.unreachable.lock().unwrap().contains(&target.host) {
            return Err(TransportError::ConnectionFailed {
                host: target.host.clone(),
                message: "connection refused".to_string(),
            });
        }
        self.commands
            .lock()
            .unwrap()
            .push((target.host.clone(), command.to_string()));

        let mut exit_code = 0;
        if is_activation(command)
            && let Some(codes) = self.activation_exits.lock().unwrap().get_mut(&target.host)
        {
            exit_code = codes.pop_front().unwrap_or(0);
        }
        Ok(CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "activation script failed".to_string()
            },
        })
    }

    async fn upload_file(
        &self,
        target: &Target,
        local: &Path,
        remote: &str,
    ) -> std::result::Result<(), TransportError> {
        assert!(local.exists(), "artifact {} was not built", local.display());
        self.uploads
            .lock()
            .unwrap()
            .push((target.machine.clone(), remote.to_string()));
        Ok(())
    }

    async fn download_file(
        &self,
        _target: &Target,
        _remote: &str,
        _local: &Path,
    ) -> std::result::Result<(), TransportError> {
        Ok(())
    }
}

/// Returns whatever evaluation the test set last
#[derive(Default)]
pub struct StaticEvaluator {
    evaluation: Mutex<Evaluation>,
}

impl Evaluator for StaticEvaluator {
    fn evaluate(
        &self,
        _sources: &[PathBuf],
        _args: &BTreeMap<String, String>,
    ) -> std::result::Result<Evaluation, EvalError> {
        Ok(self.evaluation.lock().unwrap().clone())
    }
}

struct FakePlugin {
    calls: CallLog,
    transport: Arc<FakeTransport>,
}

impl Plugin for FakePlugin {
    fn name(&self) -> &str {
        "fake"
    }

    fn register(&self, registry: &mut PluginRegistry) {
        for (resource_type, machine) in [(FAKE, false), (FAKE_MACHINE, true)] {
            let calls = self.calls.clone();
            let transport = self.transport.clone();
            registry.register_backend(resource_type, move |handle| {
                Arc::new(FakeResource {
                    handle,
                    calls: calls.clone(),
                    transport: transport.clone(),
                    machine,
                }) as Arc<dyn Resource>
            });
        }
    }
}

pub fn fake(name: &str, config: Value) -> Definition {
    Definition::new(name, FAKE, config)
}

pub fn fake_machine(name: &str, config: Value) -> Definition {
    Definition::new(name, FAKE_MACHINE, config)
}

/// A temporary state file with fake backends
pub struct TestEnv {
    pub dir: TempDir,
    pub ctx: DeploymentContext,
    pub calls: CallLog,
    pub transport: Arc<FakeTransport>,
    evaluator: Arc<StaticEvaluator>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let calls = CallLog::default();
        let transport = Arc::new(FakeTransport::default());
        let evaluator = Arc::new(StaticEvaluator::default());
        let ctx = Self::context_in(dir.path(), &calls, &transport, &evaluator).await;
        Self {
            dir,
            ctx,
            calls,
            transport,
            evaluator,
        }
    }

    async fn context_in(
        dir: &Path,
        calls: &CallLog,
        transport: &Arc<FakeTransport>,
        evaluator: &Arc<StaticEvaluator>,
    ) -> DeploymentContext {
        let state = StateFile::open_local(dir.join("deployments.json"))
            .await
            .unwrap();
        let plugin = FakePlugin {
            calls: calls.clone(),
            transport: transport.clone(),
        };
        DeploymentContext {
            state: Arc::new(state),
            plugins: Arc::new(PluginRegistry::with_plugins(&[&plugin])),
            evaluator: evaluator.clone(),
            transport: transport.clone(),
            builder: Arc::new(BundleBuilder::new(dir.join("build"))),
            interrupt: Interrupt::new(),
            wait: WaitConfig::immediate(3),
        }
    }

    /// A context reading the state file from disk again
    #[allow(dead_code)]
    pub async fn reopen(&self) -> DeploymentContext {
        Self::context_in(self.dir.path(), &self.calls, &self.transport, &self.evaluator).await
    }

    pub fn define(&self, definitions: Vec<Definition>) {
        self.define_with_rollback(definitions, None);
    }

    pub fn define_with_rollback(&self, definitions: Vec<Definition>, rollback: Option<bool>) {
        let mut evaluation = Evaluation::default();
        evaluation.network.rollback_enabled = rollback;
        for definition in definitions {
            evaluation.insert(definition).unwrap();
        }
        *self.evaluator.evaluation.lock().unwrap() = evaluation;
    }

    pub async fn deployment(&self) -> Deployment {
        let spec = DeploymentSpec {
            name: Some("test".to_string()),
            ..Default::default()
        };
        Deployment::create(self.ctx.clone(), &spec).await.unwrap()
    }
}

#[allow(dead_code)]
pub fn no_config() -> Value {
    json!({})
}
