//! Plugin process registry.
//!
//! A [`PluginRegistry`] owns the running plugin processes of one kind. It
//! spawns a binary with the kind's magic cookie in its environment, reads
//! and validates the handshake line, connects to the announced address and
//! initializes the plugin before anyone else can reach it. The first start
//! from an install directory also runs the kind's one-time setup and leaves
//! a setup lock behind, which survives uninstalling the plugin.

pub mod error;
pub mod kind;
pub mod orphans;
pub mod process;
pub mod profiles;
pub mod registry;

#[cfg(feature = "test-helpers")]
pub mod scripted;

pub use error::{RegistryError, Result};
pub use kind::{AgentServiceKind, PluginKind, ProvisionerKind, ServerIdentity};
pub use process::PluginProcess;
pub use profiles::{InMemoryProfileStore, ProfileStore};
pub use registry::{
    AgentServiceRegistry, PluginHandle, PluginRegistry, ProvisionerRegistry, DEFAULT_START_TIMEOUT,
};
