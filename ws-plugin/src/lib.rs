pub mod client;
pub mod discovery;
pub mod error;
pub mod manifest;

pub use client::ManifestClient;
pub use discovery::discover_installed;
pub use error::{PluginError, Result};
pub use manifest::{
    find_latest_version, get_default_plugins, parse_version, PluginManifest, PluginManifests,
    PluginVersion, LATEST_ALIAS,
};
