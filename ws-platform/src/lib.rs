//! Cross-platform helpers for the workspace server.
//!
//! Plugin binaries are published per operating system and CPU architecture,
//! and installed under the server's state directory. This crate owns both
//! concerns so the resolver, installer and registry agree on them.

pub mod fs;
pub mod os;
pub mod paths;

pub use os::{OperatingSystem, UnsupportedPlatform};
pub use paths::{executable_name, plugin_install_path, plugin_name_from_path, state_dir, PluginDirs};
