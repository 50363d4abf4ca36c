//! Building machine configurations
//!
//! The build is one batched call covering every active machine.

use crate::error::{DeployError, Result};
use async_trait::async_trait;
use chrono::Utc;
use fleetops_core::Definition;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// One machine to build a configuration for
#[derive(Debug, Clone, Serialize)]
pub struct BuildInput {
    pub machine: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub definition: Definition,
    /// Stored attributes of the machine at build time
    pub attrs: BTreeMap<String, String>,
}

/// Artifacts of one build
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutput {
    pub build_id: String,
    /// Machine name to local artifact path
    pub artifacts: BTreeMap<String, PathBuf>,
}

impl BuildOutput {
    pub fn artifact(&self, machine: &str) -> Result<&Path> {
        self.artifacts
            .get(machine)
            .map(PathBuf::as_path)
            .ok_or_else(|| DeployError::Build(format!("no artifact was built for '{machine}'")))
    }
}

#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, inputs: &[BuildInput]) -> Result<BuildOutput>;
}

/// Writes one JSON configuration per machine plus a manifest
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    build_dir: PathBuf,
}

#[derive(Serialize)]
struct Manifest<'a> {
    build_id: &'a str,
    created_at: String,
    machines: Vec<&'a str>,
}

impl BundleBuilder {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }
}

fn new_build_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}

#[async_trait]
impl Builder for BundleBuilder {
    #[tracing::instrument(skip(self, inputs), fields(machines = inputs.len()))]
    async fn build(&self, inputs: &[BuildInput]) -> Result<BuildOutput> {
        let build_id = new_build_id();
        let out_dir = self.build_dir.join(&build_id);
        fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| DeployError::Build(format!("{}: {e}", out_dir.display())))?;

        let mut artifacts = BTreeMap::new();
        for input in inputs {
            let path = out_dir.join(format!("{}.json", input.machine));
            let content = serde_json::to_string_pretty(input)?;
            fs::write(&path, content)
                .await
                .map_err(|e| DeployError::Build(format!("{}: {e}", path.display())))?;
            artifacts.insert(input.machine.clone(), path);
        }

        let manifest = Manifest {
            build_id: &build_id,
            created_at: Utc::now().to_rfc3339(),
            machines: inputs.iter().map(|i| i.machine.as_str()).collect(),
        };
        let manifest_path = out_dir.join("manifest.json");
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
            .await
            .map_err(|e| DeployError::Build(format!("{}: {e}", manifest_path.display())))?;

        tracing::info!(build_id = %build_id, "Built machine configurations");
        Ok(BuildOutput {
            build_id,
            artifacts,
        })
    }
}
