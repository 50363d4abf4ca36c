//! Backend and plugin registration
//!
//! Backends register a factory per resource type in an explicit setup step.
//! The resulting [`PluginRegistry`] is built once at startup and shared by
//! reference with every deployment.

use crate::error::{DeployError, Result};
use crate::resource::{Resource, ResourceHandle};
use fleetops_state::{LockBackend, StorageBackend};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub type ResourceFactory = Arc<dyn Fn(ResourceHandle) -> Arc<dyn Resource> + Send + Sync>;
pub type StorageFactory = Arc<dyn Fn(&Path) -> Arc<dyn StorageBackend> + Send + Sync>;
pub type LockFactory = Arc<dyn Fn(&Path) -> Arc<dyn LockBackend> + Send + Sync>;

/// Maps a resource type tag to the backend implementing it
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, ResourceFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, resource_type: &str, factory: F)
    where
        F: Fn(ResourceHandle) -> Arc<dyn Resource> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(resource_type.to_string(), Arc::new(factory))
            .is_some()
        {
            tracing::warn!(
                resource_type,
                "Backend registered twice, keeping the last one"
            );
        }
    }

    pub fn is_registered(&self, resource_type: &str) -> bool {
        self.factories.contains_key(resource_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the backend object for an existing row
    pub fn instantiate(&self, handle: ResourceHandle) -> Result<Arc<dyn Resource>> {
        let factory = self.factories.get(handle.resource_type()).ok_or_else(|| {
            DeployError::UnknownResourceType {
                name: handle.name().to_string(),
                resource_type: handle.resource_type().to_string(),
            }
        })?;
        Ok(factory(handle))
    }
}

/// A bundle of backends, storage and lock implementations
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut PluginRegistry);
}

/// Everything contributed by the loaded plugins
#[derive(Clone, Default)]
pub struct PluginRegistry {
    pub backends: BackendRegistry,
    storage: BTreeMap<String, StorageFactory>,
    locks: BTreeMap<String, LockFactory>,
    plugins: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated by each plugin in turn
    pub fn with_plugins(plugins: &[&dyn Plugin]) -> Self {
        let mut registry = Self::new();
        for plugin in plugins {
            registry.load(*plugin);
        }
        registry
    }

    pub fn load(&mut self, plugin: &dyn Plugin) {
        tracing::debug!(plugin = plugin.name(), "Registering plugin");
        plugin.register(self);
        self.plugins.push(plugin.name().to_string());
    }

    pub fn plugin_names(&self) -> &[String] {
        &self.plugins
    }

    pub fn register_backend<F>(&mut self, resource_type: &str, factory: F)
    where
        F: Fn(ResourceHandle) -> Arc<dyn Resource> + Send + Sync + 'static,
    {
        self.backends.register(resource_type, factory);
    }

    pub fn register_storage<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Path) -> Arc<dyn StorageBackend> + Send + Sync + 'static,
    {
        self.storage.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_lock<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Path) -> Arc<dyn LockBackend> + Send + Sync + 'static,
    {
        self.locks.insert(name.to_string(), Arc::new(factory));
    }

    pub fn storage(&self, name: &str, state_path: &Path) -> Result<Arc<dyn StorageBackend>> {
        let factory = self.storage.get(name).ok_or_else(|| {
            DeployError::InvalidOption(format!("unknown storage backend '{name}'"))
        })?;
        Ok(factory(state_path))
    }

    pub fn lock(&self, name: &str, state_path: &Path) -> Result<Arc<dyn LockBackend>> {
        let factory = self
            .locks
            .get(name)
            .ok_or_else(|| DeployError::InvalidOption(format!("unknown lock backend '{name}'")))?;
        Ok(factory(state_path))
    }
}
