//! Filesystem locations used by the server and its plugins.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Get the server's state directory (`~/.ws`).
pub fn state_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".ws"))
}

/// Get the correct executable name for the platform (adds .exe on Windows)
pub fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Deterministic install location of a plugin binary: `<base>/<name>/<name>[.exe]`.
pub fn plugin_install_path(base: &Path, name: &str) -> PathBuf {
    base.join(name).join(executable_name(name))
}

/// Plugin name for a binary path: its file stem, without a Windows `.exe`.
pub fn plugin_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name.strip_suffix(".exe").unwrap_or(file_name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Per-kind plugin base directories under a common root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDirs {
    root: PathBuf,
}

impl PluginDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.ws/plugins`
    pub fn default_root() -> Result<Self> {
        Ok(Self::new(state_dir()?.join("plugins")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn provisioners(&self) -> PathBuf {
        self.root.join("provisioners")
    }

    pub fn agent_services(&self) -> PathBuf {
        self.root.join("agent-services")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_install_path_is_deterministic() {
        let base = Path::new("/srv/ws/plugins/provisioners");
        let path = plugin_install_path(base, "docker-provider");

        assert_eq!(
            path.parent(),
            Some(Path::new("/srv/ws/plugins/provisioners/docker-provider"))
        );
        assert_eq!(
            plugin_name_from_path(&path).as_deref(),
            Some("docker-provider")
        );
        assert_eq!(path, plugin_install_path(base, "docker-provider"));
    }

    #[test]
    fn test_plugin_name_strips_exe() {
        assert_eq!(
            plugin_name_from_path(Path::new("C:/plugins/aws/aws.exe")).as_deref(),
            Some("aws")
        );
        assert_eq!(plugin_name_from_path(Path::new("/")), None);
    }

    #[test]
    fn test_plugin_dirs_layout() {
        let dirs = PluginDirs::new("/tmp/ws-plugins");
        assert_eq!(dirs.provisioners(), Path::new("/tmp/ws-plugins/provisioners"));
        assert_eq!(
            dirs.agent_services(),
            Path::new("/tmp/ws-plugins/agent-services")
        );
    }

    #[test]
    fn test_state_dir_under_home() {
        let state = state_dir().unwrap();
        assert!(state.ends_with(".ws"));
        assert!(state.is_absolute());
    }
}
