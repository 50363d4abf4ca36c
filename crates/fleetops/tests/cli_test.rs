mod common;

use common::TestWorkspace;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("rollback"));
}

#[test]
fn test_cli_version() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fleetops"));
}

#[test]
fn test_invalid_command() {
    let ws = TestWorkspace::new();
    ws.cmd().arg("invalid-command").assert().failure();
}

#[test]
fn test_list_empty_state() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("デプロイメントがありません"));
}

#[test]
fn test_create_and_list() {
    let ws = TestWorkspace::new();
    let uuid = ws.create_deployment("staging");
    assert_eq!(uuid.len(), 36);
    assert!(ws.state_file().exists());

    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&uuid))
        .stdout(predicate::str::contains("staging"));
}

#[test]
fn test_create_with_missing_source_fails() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .args(["create", "missing.kdl"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("が存在しません"));
}

#[test]
fn test_info_requires_a_deployment() {
    let ws = TestWorkspace::new();
    ws.cmd().arg("info").assert().code(1);
}

#[test]
fn test_ambiguous_deployment_selection() {
    let ws = TestWorkspace::new();
    ws.create_deployment("one");
    ws.create_deployment("two");

    ws.cmd().arg("info").assert().code(1);
    ws.cmd()
        .args(["-d", "two", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("two"));
}

#[test]
fn test_set_args_feed_templates() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");

    ws.cmd()
        .args(["set-args", "--arg", "env=staging", "--arg", "region=tk1"])
        .assert()
        .success();
    ws.cmd()
        .args(["set-args", "--unset", "region"])
        .assert()
        .success();
    ws.cmd()
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("env = staging"))
        .stdout(predicate::str::contains("region").not());
}

#[test]
fn test_set_args_rejects_missing_value() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .args(["set-args", "--arg", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_dry_run_shows_plan_without_changes() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");

    ws.cmd()
        .args(["deploy", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ web (none)"));
    ws.cmd()
        .args(["info", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn test_create_only_rename_and_destroy() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");

    ws.cmd()
        .args(["deploy", "--create-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("デプロイが完了しました"));
    ws.cmd()
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("web"))
        .stdout(predicate::str::contains("UP"))
        .stdout(predicate::str::contains("none [192.0.2.10]"));

    ws.cmd().args(["rename", "web", "frontend"]).assert().success();
    ws.cmd()
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("frontend"));

    // without --yes nothing happens
    ws.cmd()
        .arg("destroy")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));
    ws.cmd()
        .arg("info")
        .assert()
        .stdout(predicate::str::contains("frontend"));

    ws.cmd()
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 件のリソースを破棄しました"));
    ws.cmd()
        .args(["info", "--json"])
        .assert()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn test_delete_refused_while_resources_remain() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");
    ws.cmd()
        .args(["deploy", "--create-only"])
        .assert()
        .success();

    ws.cmd().arg("delete").assert().code(1);
    ws.cmd().args(["delete", "--force"]).assert().success();
    ws.cmd()
        .arg("list")
        .assert()
        .stdout(predicate::str::contains("デプロイメントがありません"));
}

#[test]
fn test_delete_resources_forgets_rows() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");
    ws.cmd()
        .args(["deploy", "--create-only"])
        .assert()
        .success();

    ws.cmd()
        .args(["delete-resources", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 件のリソースをステートから削除しました"));
    ws.cmd().args(["delete-resources", "web"]).assert().code(1);
    ws.cmd().arg("delete").assert().success();
}

#[test]
fn test_export_and_import_into_another_state() {
    let ws = TestWorkspace::new();
    let uuid = ws.create_deployment("staging");
    ws.cmd()
        .args(["deploy", "--create-only"])
        .assert()
        .success();

    let output = ws.cmd().arg("export").output().unwrap();
    assert!(output.status.success());
    let exported = ws.path().join("export.json");
    std::fs::write(&exported, &output.stdout).unwrap();

    let other_state = ws.path().join("other.json");
    ws.cmd()
        .env("FLEETOPS_STATE", &other_state)
        .arg("import")
        .arg(&exported)
        .assert()
        .success()
        .stdout(predicate::str::contains(&uuid));
    ws.cmd()
        .env("FLEETOPS_STATE", &other_state)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("web"));

    // importing again into the same state gets a fresh id
    ws.cmd()
        .env("FLEETOPS_STATE", &other_state)
        .arg("import")
        .arg(&exported)
        .assert()
        .success()
        .stdout(predicate::str::contains(&uuid).not());
}

#[test]
fn test_clone_copies_settings_only() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");
    ws.cmd()
        .args(["deploy", "--create-only"])
        .assert()
        .success();

    ws.cmd()
        .args(["-d", "staging", "clone", "--name", "production"])
        .assert()
        .success();
    ws.cmd()
        .args(["-d", "production", "info", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
    ws.cmd()
        .args(["-d", "production", "deploy", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ web (none)"));
}

#[test]
fn test_rollback_needs_enabled_profile() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");
    ws.cmd()
        .args(["rollback", "1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("rollback is not enabled"));
}

#[test]
fn test_list_backups_empty() {
    let ws = TestWorkspace::new();
    ws.create_deployment("staging");
    ws.cmd()
        .arg("list-backups")
        .assert()
        .success()
        .stdout(predicate::str::contains("バックアップがありません"));
}
