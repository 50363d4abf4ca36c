//! Registration of the built-in backends

use crate::keypair::{self, SshKeyPair};
use crate::none::{self, NoneMachine};
use crate::sakura::{self, SakuraServer};
use fleetops_engine::{Plugin, PluginRegistry, Resource, Transport};
use fleetops_state::{FileLock, LocalStorage, NoLock};
use std::sync::Arc;

/// Backends, storage and locks shipped with fleetops
pub struct BuiltinPlugin {
    transport: Arc<dyn Transport>,
}

impl BuiltinPlugin {
    /// Machine backends probe their machines through `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Plugin for BuiltinPlugin {
    fn name(&self) -> &str {
        "builtin"
    }

    fn register(&self, registry: &mut PluginRegistry) {
        let transport = self.transport.clone();
        registry.register_backend(none::RESOURCE_TYPE, move |handle| {
            Arc::new(NoneMachine::new(handle, transport.clone())) as Arc<dyn Resource>
        });

        registry.register_backend(keypair::RESOURCE_TYPE, |handle| {
            Arc::new(SshKeyPair::new(handle)) as Arc<dyn Resource>
        });

        let transport = self.transport.clone();
        registry.register_backend(sakura::RESOURCE_TYPE, move |handle| {
            Arc::new(SakuraServer::new(handle, transport.clone())) as Arc<dyn Resource>
        });

        registry.register_storage("local", |_| Arc::new(LocalStorage));
        registry.register_lock("file", |path| Arc::new(FileLock::for_state_file(path)));
        registry.register_lock("none", |_| Arc::new(NoLock));
    }
}
