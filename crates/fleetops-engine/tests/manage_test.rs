mod common;

use common::{TestEnv, fake};
use fleetops_engine::{
    DeployError, DeployOptions, Deployment, DeploymentSpec, import_deployment, list_deployments,
};
use fleetops_state::StateError;
use serde_json::json;
use std::path::PathBuf;

#[tokio::test]
async fn test_create_modify_and_list() {
    let env = TestEnv::new().await;
    let mut deployment = env.deployment().await;
    assert_eq!(deployment.name().as_deref(), Some("test"));

    deployment
        .modify(&DeploymentSpec {
            description: Some("staging fleet".to_string()),
            sources: vec![PathBuf::from("network.kdl")],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(deployment.description().as_deref(), Some("staging fleet"));
    let sources = deployment.sources().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0].is_absolute());

    let listed = list_deployments(&env.ctx.state);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uuid, deployment.uuid());
    assert_eq!(listed[0].name.as_deref(), Some("test"));
}

#[tokio::test]
async fn test_find_by_name_uuid_or_default() {
    let env = TestEnv::new().await;
    let deployment = env.deployment().await;

    let by_name = Deployment::find(env.ctx.clone(), Some("test")).unwrap();
    assert_eq!(by_name.uuid(), deployment.uuid());
    let uuid = deployment.uuid().to_string();
    let by_uuid = Deployment::find(env.ctx.clone(), Some(uuid.as_str())).unwrap();
    assert_eq!(by_uuid.uuid(), deployment.uuid());
    let only = Deployment::find(env.ctx.clone(), None).unwrap();
    assert_eq!(only.uuid(), deployment.uuid());

    deployment.clone_as(Some("other".to_string())).await.unwrap();
    assert!(Deployment::find(env.ctx.clone(), None).is_err());
    assert!(matches!(
        Deployment::find(env.ctx.clone(), Some("missing")),
        Err(DeployError::State(StateError::DeploymentNotFound(_)))
    ));
}

#[tokio::test]
async fn test_clone_copies_attributes_not_resources() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.set_arg("region", "is1a").await.unwrap();
    deployment.deploy(&DeployOptions::default()).await.unwrap();

    let copy = deployment.clone_as(Some("copy".to_string())).await.unwrap();
    assert_ne!(copy.uuid(), deployment.uuid());
    assert_eq!(copy.name().as_deref(), Some("copy"));
    assert_eq!(copy.args().unwrap()["region"], "is1a");
    assert_eq!(copy.resources().count(), 0);
}

#[tokio::test]
async fn test_delete_refuses_while_resources_remain() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();
    let uuid = deployment.uuid();

    let err = Deployment::load(env.ctx.clone(), uuid)
        .unwrap()
        .delete(false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::State(StateError::DeploymentNotEmpty { count: 1, .. })
    ));

    deployment.delete(true).await.unwrap();
    assert!(list_deployments(&env.ctx.state).is_empty());
    assert!(!env.calls.contains("destroy:a"));
}

#[tokio::test]
async fn test_set_and_unset_args() {
    let env = TestEnv::new().await;
    let deployment = env.deployment().await;

    deployment.set_arg("count", "3").await.unwrap();
    deployment.set_arg("zone", "tk1a").await.unwrap();
    assert_eq!(deployment.args().unwrap().len(), 2);

    assert!(deployment.unset_arg("count").await.unwrap());
    assert!(!deployment.unset_arg("count").await.unwrap());
    assert_eq!(
        deployment.args().unwrap().keys().collect::<Vec<_>>(),
        ["zone"]
    );
}

#[tokio::test]
async fn test_export_then_import_elsewhere() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();
    let exported = deployment.export().unwrap();

    let other = TestEnv::new().await;
    let backends = &other.ctx.plugins.backends;
    let uuid = import_deployment(&other.ctx.state, backends, exported.clone())
        .await
        .unwrap();
    assert_eq!(uuid, deployment.uuid());
    let imported = Deployment::load(other.ctx.clone(), uuid).unwrap();
    assert_eq!(imported.info().len(), 2);
    assert_eq!(imported.resource("b").unwrap().handle().index(), Some(1));

    // importing into a state that already has the deployment gets a new uuid
    let again = import_deployment(&other.ctx.state, backends, exported)
        .await
        .unwrap();
    assert_ne!(again, uuid);
    assert_eq!(list_deployments(&other.ctx.state).len(), 2);
}

#[tokio::test]
async fn test_import_rejects_inconsistent_rows() {
    let env = TestEnv::new().await;
    env.define(vec![fake("a", json!({})), fake("b", json!({}))]);
    let mut deployment = env.deployment().await;
    deployment.deploy(&DeployOptions::default()).await.unwrap();
    let exported = deployment.export().unwrap();
    let backends = &env.ctx.plugins.backends;

    let other = TestEnv::new().await;
    let state = &other.ctx.state;
    let import = move |value| import_deployment(state, backends, value);

    let mut twins = exported.clone();
    for id in ["1", "2"] {
        twins["resources"][id]["name"] = json!("web");
    }
    assert!(matches!(
        import(twins).await,
        Err(DeployError::State(StateError::DuplicateResource { name, .. })) if name == "web"
    ));

    let mut unknown = exported.clone();
    unknown["resources"]["1"]["type"] = json!("floppy");
    assert!(matches!(
        import(unknown).await,
        Err(DeployError::UnknownResourceType { resource_type, .. }) if resource_type == "floppy"
    ));

    let mut misplaced = exported;
    misplaced["resources"]["1"]["id"] = json!(5);
    assert!(matches!(
        import(misplaced).await,
        Err(DeployError::State(StateError::MisplacedResource { key: 1, id: 5, .. }))
    ));

    assert!(list_deployments(&other.ctx.state).is_empty());
}
