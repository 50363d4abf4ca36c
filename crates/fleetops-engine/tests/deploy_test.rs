mod common;

use common::{FAKE, FAKE_MACHINE, TestEnv, fake, fake_machine};
use fleetops_engine::resource::attrs;
use fleetops_engine::{DeployError, DeployOptions, Deployment, ResourceState};
use serde_json::json;

fn only(names: &[&str]) -> DeployOptions {
    DeployOptions {
        include: names.iter().map(|n| n.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_deploy_creates_dependencies_first() {
    let env = TestEnv::new().await;
    env.define(vec![
        fake("key", json!({ "delay-ms": 50 })),
        fake("web", json!({ "depends-on": "key" })),
        fake("db", json!({})),
    ]);
    let mut deployment = env.deployment().await;

    let report = deployment.deploy(&DeployOptions::default()).await.unwrap();

    assert_eq!(report.plan.create.len(), 3);
    assert_eq!(report.created.len(), 3);
    assert!(env.calls.position("create-end:key") < env.calls.position("create-start:web"));
    for resource in deployment.resources() {
        assert_eq!(resource.handle().state(), ResourceState::Up);
    }
    // no machines, so nothing was built
    assert!(report.build_id.is_none());
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents() {
    let env = TestEnv::new().await;
    env.define(vec![
        fake("key", json!({ "fail": "boom" })),
        fake("web", json!({ "depends-on": "key" })),
        fake("db", json!({ "delay-ms": 20 })),
    ]);
    let mut deployment = env.deployment().await;

    let err = deployment
        .deploy(&DeployOptions::default())
        .await
        .unwrap_err();

    let DeployError::Multiple(errors) = err else {
        panic!("expected several failures, got {err}");
    };
    let failed: Vec<&str> = errors.task_names().collect();
    assert_eq!(failed, ["key", "web"]);
    assert!(matches!(
        errors.errors()["web"],
        DeployError::DependencyFailed { .. }
    ));
    assert!(errors.to_string().contains("key: key: boom"));

    assert!(!env.calls.contains("create-start:web"));
    assert!(env.calls.contains("create-end:db"));
    assert_eq!(
        deployment.resource("db").unwrap().handle().state(),
        ResourceState::Up
    );
    assert_eq!(
        deployment.resource("web").unwrap().handle().state(),
        ResourceState::Missing
    );
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;

    let first = deployment.deploy(&DeployOptions::default()).await.unwrap();
    assert_eq!(first.plan.create.len(), 2);
    let indices: Vec<_> = deployment.info().iter().map(|i| i.index).collect();

    let second = deployment.deploy(&DeployOptions::default()).await.unwrap();
    assert!(second.plan.is_empty());
    let again: Vec<_> = deployment.info().iter().map(|i| i.index).collect();
    assert_eq!(indices, again);
    assert_eq!(indices, [Some(0), Some(1)]);
}

#[tokio::test]
async fn test_obsolete_resources_are_flagged_and_revived() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    env.define(vec![fake("a", json!({}))]);
    let report = deployment.deploy(&DeployOptions::default()).await.unwrap();
    assert_eq!(report.plan.obsolete, ["b"]);
    assert!(deployment.resource("b").unwrap().handle().obsolete());
    let active: Vec<String> = deployment
        .active_resources()
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(active, ["a"]);

    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let report = deployment.deploy(&DeployOptions::default()).await.unwrap();
    assert_eq!(report.plan.revived, ["b"]);
    assert!(!deployment.resource("b").unwrap().handle().obsolete());
    // the revived row kept its index
    assert_eq!(deployment.resource("b").unwrap().handle().index(), Some(1));
}

#[tokio::test]
async fn test_indices_are_never_reused() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    env.define(vec![fake("a", json!({}))]);
    let report = deployment
        .deploy(&DeployOptions {
            kill_obsolete: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.destroyed, ["b"]);
    assert!(deployment.resource("b").is_none());

    env.define(vec![fake("a", json!({})), fake("c", json!({}))]);
    deployment.deploy(&DeployOptions::default()).await.unwrap();
    assert_eq!(deployment.resource("a").unwrap().handle().index(), Some(0));
    assert_eq!(deployment.resource("c").unwrap().handle().index(), Some(2));
}

#[tokio::test]
async fn test_type_change_is_rejected() {
    let env = TestEnv::new().await;
    env.define(vec![fake("web", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    env.define(vec![fake_machine("web", json!({}))]);
    let err = deployment
        .deploy(&DeployOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::TypeChanged { ref stored, ref declared, .. }
            if stored == FAKE && declared == FAKE_MACHINE
    ));
    assert_eq!(deployment.resource("web").unwrap().resource_type(), FAKE);
}

#[tokio::test]
async fn test_unknown_type_is_rejected_before_any_change() {
    let env = TestEnv::new().await;
    env.define(vec![
        fake("a", json!({})),
        fleetops_core::Definition::new("b", "hetzner-server", json!({})),
    ]);
    let mut deployment = env.deployment().await;

    let err = deployment
        .deploy(&DeployOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::UnknownResourceType { .. }));
    assert_eq!(deployment.resources().count(), 0);
    assert!(env.calls.entries().is_empty());
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({}))]);
    let mut deployment = env.deployment().await;

    let report = deployment
        .deploy(&DeployOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.plan.create, [("a".to_string(), FAKE.to_string())]);
    assert_eq!(deployment.resources().count(), 0);
    assert!(env.calls.entries().is_empty());
}

#[tokio::test]
async fn test_include_limits_the_create_phase() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;

    let report = deployment.deploy(&only(&["a"])).await.unwrap();
    assert_eq!(report.created, ["a"]);
    // reconciliation still covers every definition
    assert_eq!(deployment.resources().count(), 2);
    assert!(!env.calls.contains("create-start:b"));
}

#[tokio::test]
async fn test_rename_survives_reload() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();
    let id = deployment.resource("a").unwrap().handle().id();

    deployment.rename_resource("a", "z").await.unwrap();
    assert!(matches!(
        deployment.rename_resource("z", "b").await,
        Err(DeployError::State(_))
    ));

    let reopened = Deployment::find(env.reopen().await, Some("test")).unwrap();
    let z = reopened.resource("z").unwrap();
    assert_eq!(z.handle().id(), id);
    assert_eq!(z.handle().index(), Some(0));
    assert_eq!(z.handle().state(), ResourceState::Up);
    assert!(reopened.resource("a").is_none());
}

#[tokio::test]
async fn test_destroy_order_and_kept_resources() {
    let env = TestEnv::new().await;
    env.define(vec![
        fake("server", json!({ "destroy-before": ["key"] })),
        fake("key", json!({})),
        fake("volume", json!({ "keep": true })),
    ]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    let report = deployment.destroy_resources(&[], &[], false).await.unwrap();

    assert_eq!(report.destroyed, ["key", "server"]);
    assert_eq!(report.kept, ["volume"]);
    assert!(env.calls.position("destroy:server") < env.calls.position("destroy:key"));
    let left: Vec<&str> = deployment.resources().map(|r| r.name()).collect();
    assert_eq!(left, ["volume"]);
}

#[tokio::test]
async fn test_teardown_reverses_creation_dependencies() {
    let env = TestEnv::new().await;
    env.define(vec![
        fake("key", json!({})),
        fake("db", json!({ "depends-on": "key" })),
        fake("web", json!({ "depends-on": ["db", "key"] })),
    ]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    let web = deployment.resource("web").unwrap();
    assert_eq!(
        web.handle().get_json::<Vec<String>>(attrs::CREATE_AFTER).unwrap(),
        Some(vec!["db".to_string(), "key".to_string()])
    );
    assert!(
        deployment
            .resource("key")
            .unwrap()
            .handle()
            .get_str(attrs::CREATE_AFTER)
            .is_none()
    );

    let report = deployment.destroy_resources(&[], &[], false).await.unwrap();

    assert_eq!(report.destroyed.len(), 3);
    assert!(env.calls.position("destroy:web") < env.calls.position("destroy:db"));
    assert!(env.calls.position("destroy:db") < env.calls.position("destroy:key"));
}

#[tokio::test]
async fn test_teardown_order_survives_partial_deploy_and_rename() {
    let env = TestEnv::new().await;
    env.define(vec![
        fake("key", json!({})),
        fake("web", json!({ "depends-on": "key" })),
    ]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    // key is outside the selection but still recorded for web
    deployment.deploy(&only(&["web"])).await.unwrap();
    deployment.rename_resource("key", "ssh-key").await.unwrap();

    let web = deployment.resource("web").unwrap();
    assert_eq!(
        web.handle().get_json::<Vec<String>>(attrs::CREATE_AFTER).unwrap(),
        Some(vec!["ssh-key".to_string()])
    );

    deployment.destroy_resources(&[], &[], false).await.unwrap();
    assert!(env.calls.position("destroy:web") < env.calls.position("destroy:ssh-key"));
}

#[tokio::test]
async fn test_delete_resources_forgets_without_destroying() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    let removed = deployment
        .delete_resources(&["a".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, ["a"]);
    assert!(deployment.resource("a").is_none());
    assert!(!env.calls.contains("destroy:a"));
    assert!(matches!(
        deployment.delete_resources(&["missing".to_string()]).await,
        Err(DeployError::ResourceNotFound(_))
    ));
}

#[tokio::test]
async fn test_post_activation_runs_without_machines() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({}))]);
    let mut deployment = env.deployment().await;

    deployment.deploy(&DeployOptions::default()).await.unwrap();
    assert!(env.calls.contains("post:a"));
    assert_eq!(
        deployment.resource("a").unwrap().handle().get_str(attrs::STATE).as_deref(),
        Some("UP")
    );
}

#[tokio::test]
async fn test_zero_concurrency_is_rejected_before_any_change() {
    let env = TestEnv::new().await;
    env.define(vec![fake_machine("web", json!({}))]);
    let mut deployment = env.deployment().await;

    for options in [
        DeployOptions {
            max_concurrent_copy: 0,
            ..Default::default()
        },
        DeployOptions {
            max_concurrent_activate: 0,
            ..Default::default()
        },
    ] {
        let err = deployment.deploy(&options).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidOption(_)), "{err}");
    }

    assert!(env.calls.entries().is_empty());
    assert_eq!(deployment.resources().count(), 0);
}
