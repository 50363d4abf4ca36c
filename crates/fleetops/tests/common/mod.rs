#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const NETWORK: &str = r#"
network {
    description "{{ env | default(value="test") }} fleet"
}

defaults {
    target-user "deploy"
}

machine "web" {
    target-host "192.0.2.10"
}
"#;

/// Isolated state file, settings and cache directory
pub struct TestWorkspace {
    pub root: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn state_file(&self) -> PathBuf {
        self.path().join("state").join("deployments.json")
    }

    pub fn write_source(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("fleetops").unwrap();
        cmd.current_dir(self.path())
            .env("FLEETOPS_CONFIG", self.path().join("config.yaml"))
            .env("FLEETOPS_STATE", self.state_file())
            .env("HOME", self.path())
            .env("XDG_CACHE_HOME", self.path().join("cache"))
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env("NO_COLOR", "1")
            .env_remove("FLEETOPS_DEPLOYMENT")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Create a deployment from [`NETWORK`] and return its UUID
    pub fn create_deployment(&self, name: &str) -> String {
        let source = self.write_source("network.kdl", NETWORK);
        let output = self
            .cmd()
            .args(["create", "--name", name])
            .arg(source)
            .output()
            .unwrap();
        assert!(output.status.success(), "{output:?}");
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }
}
