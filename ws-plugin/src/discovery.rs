use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use ws_platform::fs::is_setup_locked;
use ws_platform::plugin_install_path;

/// Find installed plugin binaries under a kind's base directory.
///
/// A plugin is installed when `<base>/<name>/<name>[.exe]` exists. Other
/// entries, including directories holding only the setup lock of an
/// uninstalled plugin, are ignored. A missing base directory means nothing
/// is installed.
pub fn discover_installed(base: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    if !base.exists() {
        return Ok(found);
    }

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %dir.display(), "Skipping plugin directory with a non UTF-8 name");
            continue;
        };

        let binary = plugin_install_path(base, name);
        if binary.is_file() {
            found.push(binary);
        } else if is_setup_locked(&dir) {
            debug!(plugin = %name, "Skipping uninstalled plugin");
        }
    }

    found.sort();
    Ok(found)
}
