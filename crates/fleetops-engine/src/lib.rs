//! Fleetops orchestration engine
//!
//! Drives resources of any backend through their lifecycle.
//!
//! ## Building blocks
//!
//! - [`parallel`]: bounded-concurrency task runner with failure aggregation
//! - [`resolver`]: dependency-ordered execution on top of the runner
//! - [`resource`]: the contract every backend implements
//! - [`registry`]: explicit backend and plugin registration
//! - [`deployment`]: the deploy, destroy and operational pipelines
//!
//! ## Usage
//!
//! ```ignore
//! let plugins = PluginRegistry::with_plugins(&[&BuiltinPlugin]);
//! let ctx = DeploymentContext { state, plugins: Arc::new(plugins), ... };
//! let mut deployment = Deployment::find(ctx, Some("production"))?;
//! let report = deployment.deploy(&DeployOptions::default()).await?;
//! ```

pub mod build;
pub mod deployment;
pub mod error;
pub mod log;
pub mod parallel;
pub mod registry;
pub mod resolver;
pub mod resource;
pub mod transport;
pub mod wait;

pub use build::{BuildInput, BuildOutput, Builder, BundleBuilder};
pub use deployment::{
    CheckReport, DeployOptions, DeployReport, Deployment, DeploymentContext, DeploymentSpec,
    DeploymentSummary, DestroyReport, REBOOT_REQUIRED_EXIT_CODE, REMOTE_CONFIG_DIR, ReconcilePlan,
    ResourceInfo, import_deployment, list_deployments,
};
pub use error::{DeployError, Result};
pub use log::ResourceLog;
pub use parallel::{Interrupt, MultipleErrors, Named, ParallelError, Workers, run_tasks};
pub use registry::{BackendRegistry, Plugin, PluginRegistry};
pub use resolver::{Completion, CompletionGuard, DependencyGraph, run_ordered};
pub use resource::{
    CheckResult, CreateOptions, Lookup, Machine, Resource, ResourceHandle, ResourceState,
};
pub use transport::{CommandOutput, Target, Transport, TransportError};
pub use wait::{WaitConfig, wait_for_reachable};
