use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use ws_events::{BackpressurePolicy, BusConfig, DEFAULT_CAPACITY};
use ws_platform::PluginDirs;
use ws_registry::ServerIdentity;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Base URL of the plugin registry. Without one, only plugins already
    /// on disk are started.
    #[serde(default = "default_registry_url")]
    pub registry_url: Option<String>,

    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_server_download_url")]
    pub server_download_url: String,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default = "default_plugin_start_timeout")]
    pub plugin_start_timeout_secs: u64,

    /// Deadline for each provisioner call made by the orchestrator.
    #[serde(default = "default_plugin_call_timeout")]
    pub plugin_call_timeout_secs: Option<u64>,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub event_policy: BackpressurePolicy,

    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn default_plugins_dir() -> PathBuf {
    if let Ok(path) = std::env::var("WS_PLUGINS_DIR") {
        return PathBuf::from(path);
    }
    PluginDirs::default_root()
        .map(|dirs| dirs.root().to_path_buf())
        .unwrap_or_else(|_| PathBuf::from(".ws").join("plugins"))
}

fn default_registry_url() -> Option<String> {
    std::env::var("WS_REGISTRY_URL").ok().filter(|s| !s.is_empty())
}

fn default_server_url() -> String {
    std::env::var("WS_SERVER_URL").unwrap_or_else(|_| "http://localhost:3986".to_string())
}

fn default_api_url() -> String {
    std::env::var("WS_API_URL").unwrap_or_else(|_| "http://localhost:3986/api".to_string())
}

fn default_api_port() -> u16 {
    env_parsed("WS_API_PORT").unwrap_or(3986)
}

fn default_server_download_url() -> String {
    std::env::var("WS_SERVER_DOWNLOAD_URL")
        .unwrap_or_else(|_| "http://localhost:3986/binary/script".to_string())
}

fn default_logs_dir() -> PathBuf {
    if let Ok(path) = std::env::var("WS_LOGS_DIR") {
        return PathBuf::from(path);
    }
    ws_platform::state_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from(".ws").join("logs"))
}

fn default_plugin_start_timeout() -> u64 {
    env_parsed("WS_PLUGIN_START_TIMEOUT").unwrap_or(30)
}

fn default_plugin_call_timeout() -> Option<u64> {
    env_parsed("WS_PLUGIN_CALL_TIMEOUT")
}

fn default_event_capacity() -> usize {
    env_parsed("WS_EVENT_CAPACITY").unwrap_or(DEFAULT_CAPACITY)
}

fn default_liveness_interval() -> u64 {
    env_parsed("WS_LIVENESS_INTERVAL").unwrap_or(60) // 1 minute
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            registry_url: default_registry_url(),
            server_url: default_server_url(),
            api_url: default_api_url(),
            api_port: default_api_port(),
            server_download_url: default_server_download_url(),
            logs_dir: default_logs_dir(),
            plugin_start_timeout_secs: default_plugin_start_timeout(),
            plugin_call_timeout_secs: default_plugin_call_timeout(),
            event_capacity: default_event_capacity(),
            event_policy: BackpressurePolicy::default(),
            liveness_interval_secs: default_liveness_interval(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Read a YAML config file; fields it leaves out come from the
    /// environment or built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::from_env());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::from_env());
        }
        Ok(serde_yaml_ng::from_str(contents)?)
    }

    pub fn plugin_dirs(&self) -> PluginDirs {
        PluginDirs::new(&self.plugins_dir)
    }

    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity {
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            server_url: self.server_url.clone(),
            api_url: self.api_url.clone(),
            api_port: self.api_port,
            server_download_url: self.server_download_url.clone(),
            logs_dir: self.logs_dir.clone(),
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            capacity: self.event_capacity,
            policy: self.event_policy,
        }
    }

    pub fn plugin_start_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_start_timeout_secs)
    }

    pub fn plugin_call_timeout(&self) -> Option<Duration> {
        self.plugin_call_timeout_secs.map(Duration::from_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = Config::from_yaml(
            r#"
plugins_dir: /srv/ws/plugins
registry_url: https://plugins.example.com/
api_port: 4000
plugin_call_timeout_secs: 120
event_policy: block_publisher
"#,
        )
        .unwrap();

        assert_eq!(config.plugins_dir, PathBuf::from("/srv/ws/plugins"));
        assert_eq!(config.registry_url.as_deref(), Some("https://plugins.example.com/"));
        assert_eq!(config.api_port, 4000);
        assert_eq!(config.plugin_call_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.bus_config().policy, BackpressurePolicy::BlockPublisher);
        assert_eq!(
            config.plugin_dirs().provisioners(),
            PathBuf::from("/srv/ws/plugins/provisioners")
        );
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_yaml("   \n").unwrap();
        assert_eq!(config.event_policy, BackpressurePolicy::DropOldest);
        assert!(config.liveness_interval() >= Duration::from_secs(1));
    }

    #[test]
    fn test_load_reports_bad_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "api_port: [not, a, port]").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn test_identity_carries_server_version() {
        let config = Config::from_yaml("server_url: http://ws.internal:3986\n").unwrap();
        let identity = config.identity();
        assert_eq!(identity.server_url, "http://ws.internal:3986");
        assert_eq!(identity.server_version, env!("CARGO_PKG_VERSION"));
    }
}
