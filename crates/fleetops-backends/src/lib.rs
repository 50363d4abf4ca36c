//! Built-in fleetops backends
//!
//! - `none`: an existing machine reached over SSH
//! - `ssh-keypair`: a key pair generated with ssh-keygen
//! - `sakura-server`: a Sakura Cloud server managed through usacloud
//!
//! [`BuiltinPlugin`] registers all of them together with the local storage
//! and the file lock. [`SshTransport`] runs remote commands with the system
//! ssh client.

pub mod error;
pub mod keypair;
pub mod none;
pub mod plugin;
pub mod probe;
pub mod sakura;
pub mod ssh;
pub mod usacloud;

pub use error::{BackendError, ResourceContext, Result};
pub use keypair::SshKeyPair;
pub use none::NoneMachine;
pub use plugin::BuiltinPlugin;
pub use sakura::SakuraServer;
pub use ssh::{SshOptions, SshTransport};
