use async_trait::async_trait;
use fleetops_backends::BuiltinPlugin;
use fleetops_backends::none::TARGET_HOST;
use fleetops_backends::{keypair, sakura};
use fleetops_core::{Definition, KdlEvaluator};
use fleetops_engine::resource::attrs;
use fleetops_engine::{
    BundleBuilder, CommandOutput, DeployOptions, Deployment, DeploymentContext, DeploymentSpec,
    DependencyGraph, Interrupt, PluginRegistry, Resource, ResourceHandle, ResourceState, Target,
    Transport,
    TransportError, WaitConfig,
};
use fleetops_state::{AttrValue, StateFile};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Pretends every machine symlinks whatever was activated last
#[derive(Default)]
struct LoopbackTransport {
    current: Mutex<Option<String>>,
    commands: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn run_command(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<CommandOutput, TransportError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{}: {command}", target.destination()));
        let mut stdout = String::new();
        if let Some(rest) = command.split("ln -sfn ").nth(1) {
            let config = rest.split_whitespace().next().unwrap_or_default();
            *self.current.lock().unwrap() = Some(config.to_string());
        } else if command.starts_with("readlink") {
            stdout = self.current.lock().unwrap().clone().unwrap_or_default();
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn upload_file(
        &self,
        _target: &Target,
        local: &Path,
        _remote: &str,
    ) -> Result<(), TransportError> {
        assert!(local.exists());
        Ok(())
    }

    async fn download_file(
        &self,
        _target: &Target,
        _remote: &str,
        _local: &Path,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A deployment over the built-in backends, named "staging"
async fn create_deployment(
    dir: &Path,
    transport: Arc<LoopbackTransport>,
    source: PathBuf,
) -> Deployment {
    let plugin = BuiltinPlugin::new(transport.clone());
    let ctx = DeploymentContext {
        state: Arc::new(
            StateFile::open_local(dir.join("deployments.json"))
                .await
                .unwrap(),
        ),
        plugins: Arc::new(PluginRegistry::with_plugins(&[&plugin])),
        evaluator: Arc::new(KdlEvaluator::new()),
        transport,
        builder: Arc::new(BundleBuilder::new(dir.join("build"))),
        interrupt: Interrupt::new(),
        wait: WaitConfig::immediate(1),
    };

    Deployment::create(
        ctx,
        &DeploymentSpec {
            name: Some("staging".to_string()),
            sources: vec![source],
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

const SOURCE: &str = r#"
network {
    description "{{ env }} machines"
}

defaults {
    target-user "deploy"
}

machine "web" {
    target-host "10.0.0.2"
    target-port 2222
}
"#;

#[tokio::test]
async fn test_deploy_existing_machine_from_kdl() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("network.kdl");
    std::fs::write(&source, SOURCE).unwrap();

    let transport = Arc::new(LoopbackTransport::default());
    let mut deployment = create_deployment(dir.path(), transport.clone(), source).await;
    deployment.set_arg("env", "staging").await.unwrap();

    let report = deployment.deploy(&DeployOptions::default()).await.unwrap();
    assert_eq!(report.activated, ["web"]);
    assert_eq!(
        deployment.description().as_deref(),
        Some("staging machines")
    );

    let web = deployment.resource("web").unwrap().clone();
    assert_eq!(web.show_type(), "none [10.0.0.2]");
    assert_eq!(web.handle().get_str(TARGET_HOST).as_deref(), Some("10.0.0.2"));
    assert_eq!(web.handle().state(), ResourceState::Up);
    assert!(
        transport
            .commands
            .lock()
            .unwrap()
            .iter()
            .all(|c| c.starts_with("deploy@10.0.0.2: "))
    );
    let target = web.as_machine().unwrap().target().unwrap();
    assert_eq!(target.port, 2222);

    let check = deployment.check(&[], &[]).await.unwrap();
    assert_eq!(check.exit_code(), 0);
    assert_eq!(check.results["web"].is_reachable, Some(true));

    // someone switched the machine by hand
    *transport.current.lock().unwrap() = Some("/tmp/other.json".to_string());
    let check = deployment.check(&[], &[]).await.unwrap();
    assert!(check.results["web"].is_outdated);
    assert_eq!(check.exit_code(), 8);

    let destroyed = deployment.destroy_resources(&[], &[], false).await.unwrap();
    assert_eq!(destroyed.destroyed, ["web"]);
    assert!(
        web.handle().get_str(attrs::CURRENT_CONFIG).is_none(),
        "row is gone after destroy"
    );
}

const LAYERED: &str = r#"
machine "db" {
    target-host "10.0.0.3"
}

machine "web" {
    target-host "10.0.0.2"
    depends-on "db"
}

machine "proxy" {
    target-host "10.0.0.1"
    depends-on "web"
}
"#;

#[tokio::test]
async fn test_builtin_machines_tear_down_after_their_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("network.kdl");
    std::fs::write(&source, LAYERED).unwrap();
    let transport = Arc::new(LoopbackTransport::default());
    let mut deployment = create_deployment(dir.path(), transport, source).await;

    deployment.deploy(&DeployOptions::default()).await.unwrap();

    let web = deployment.resource("web").unwrap();
    assert_eq!(
        web.handle().get_json::<Vec<String>>(attrs::CREATE_AFTER).unwrap(),
        Some(vec!["db".to_string()])
    );

    let resources: Vec<Arc<dyn Resource>> = deployment.resources().cloned().collect();
    let graph = DependencyGraph::for_destroy(&resources);
    assert_eq!(graph.waits_on("db"), BTreeSet::from(["web".to_string()]));
    assert_eq!(graph.waits_on("web"), BTreeSet::from(["proxy".to_string()]));
    assert!(graph.waits_on("proxy").is_empty());
    assert!(graph.find_cycle().is_none());

    let report = deployment.destroy_resources(&[], &[], false).await.unwrap();
    assert_eq!(report.destroyed.len(), 3);
    assert_eq!(deployment.resources().count(), 0);
}

#[tokio::test]
#[ignore = "requires ssh-keygen"]
async fn test_key_pair_outlives_the_machine_using_it() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("network.kdl");
    std::fs::write(
        &source,
        r#"
keypair "deploy-key"

machine "web" {
    target-host "10.0.0.2"
    depends-on "deploy-key"
}
"#,
    )
    .unwrap();
    let transport = Arc::new(LoopbackTransport::default());
    let mut deployment = create_deployment(dir.path(), transport, source).await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    let resources: Vec<Arc<dyn Resource>> = deployment.resources().cloned().collect();
    let graph = DependencyGraph::for_destroy(&resources);
    assert_eq!(
        graph.waits_on("deploy-key"),
        BTreeSet::from(["web".to_string()])
    );
}

#[tokio::test]
async fn test_sakura_server_waits_on_its_keys() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(
        StateFile::open_local(dir.path().join("deployments.json"))
            .await
            .unwrap(),
    );
    let (uuid, id) = state
        .transact(|doc| -> fleetops_state::Result<_> {
            let uuid = doc.create_deployment();
            let deployment = doc.deployment_mut(&uuid)?;
            deployment.create_resource("deploy-key", keypair::RESOURCE_TYPE)?;
            let id = deployment.create_resource("web", sakura::RESOURCE_TYPE)?;
            Ok((uuid, id))
        })
        .await
        .unwrap();
    let record = state.read(|doc| doc.deployments[&uuid].resources[&id].clone());
    let plugin = BuiltinPlugin::new(Arc::new(LoopbackTransport::default()));
    let registry = PluginRegistry::with_plugins(&[&plugin]);
    let server = registry
        .backends
        .instantiate(ResourceHandle::new(state.clone(), uuid, &record))
        .unwrap();

    let present = BTreeSet::from(["deploy-key".to_string(), "web".to_string()]);
    let definition = Definition::new(
        "web",
        sakura::RESOURCE_TYPE,
        json!({ "ssh-keys": "deploy-key" }),
    );
    let after = server.create_after(&present, &definition);
    assert_eq!(after, BTreeSet::from(["deploy-key".to_string()]));

    // nothing recorded before the create phase ran
    assert!(server.destroy_before(&present).is_empty());
    server
        .handle()
        .set_attr(attrs::CREATE_AFTER, AttrValue::json(&after).unwrap())
        .await
        .unwrap();
    assert_eq!(server.destroy_before(&present), after);
}
