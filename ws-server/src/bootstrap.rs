//! Getting plugins onto disk and running at startup.

use crate::config::Config;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use ws_platform::PluginDirs;
use ws_plugin::{discover_installed, ManifestClient};
use ws_registry::{PluginKind, PluginRegistry};

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Paths of the default plugins installed from the registry, per kind.
#[derive(Debug, Default)]
pub struct InstalledDefaults {
    pub provisioners: Vec<PathBuf>,
    pub agent_services: Vec<PathBuf>,
}

/// Download every default plugin from the configured registry that is not
/// already installed. A failed manifest fetch is logged and leaves the
/// server with whatever is on disk.
pub async fn install_default_plugins(config: &Config, dirs: &PluginDirs) -> InstalledDefaults {
    let Some(registry_url) = config.registry_url.as_deref() else {
        info!("No plugin registry configured, skipping default plugin installation");
        return InstalledDefaults::default();
    };

    let client = match ManifestClient::new(registry_url, MANIFEST_TIMEOUT) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Invalid plugin registry URL");
            return InstalledDefaults::default();
        }
    };

    let manifest = match client.get_manifest().await {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(registry = %registry_url, error = %e, "Failed to fetch plugin manifest");
            return InstalledDefaults::default();
        }
    };

    InstalledDefaults {
        provisioners: client
            .install_default_plugins(&manifest.provisioner_plugins, &dirs.provisioners())
            .await,
        agent_services: client
            .install_default_plugins(&manifest.agent_service_plugins, &dirs.agent_services())
            .await,
    }
}

/// Register every plugin installed under the registry's base directory.
/// Returns the number that came up; failures are logged and skipped.
pub async fn register_installed<K: PluginKind>(registry: &PluginRegistry<K>) -> usize {
    let kind = registry.kind().label();
    let paths = match discover_installed(registry.base_path()) {
        Ok(paths) => paths,
        Err(e) => {
            error!(kind, base = %registry.base_path().display(), error = %e, "Failed to scan plugin directory");
            return 0;
        }
    };

    let mut started = 0;
    for path in paths {
        match registry.register(&path).await {
            Ok(_) => started += 1,
            Err(e) => error!(kind, path = %path.display(), error = %e, "Failed to register plugin"),
        }
    }
    info!(kind, started, "Plugins registered");
    started
}
