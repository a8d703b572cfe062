//! The plugin catalog published by a plugin registry.
//!
//! ```json
//! {
//!   "provisionerPlugins": {
//!     "docker-provider": {
//!       "default": true,
//!       "versions": {
//!         "v0.1.0": { "downloadUrls": { "linux-amd64": "https://..." } },
//!         "latest": { "downloadUrls": { "linux-amd64": "https://..." } }
//!       }
//!     }
//!   },
//!   "agentServicePlugins": {}
//! }
//! ```

use crate::error::{PluginError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use ws_platform::OperatingSystem;

/// Reserved version key that names the preferred build directly.
pub const LATEST_ALIAS: &str = "latest";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifests {
    #[serde(default)]
    pub provisioner_plugins: BTreeMap<String, PluginManifest>,
    #[serde(default)]
    pub agent_service_plugins: BTreeMap<String, PluginManifest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub default: bool,
    pub versions: BTreeMap<String, PluginVersion>,
}

/// One published build of a plugin, keyed by `os-arch` identifier.
///
/// Keys are kept as strings so a catalog that adds a platform this server
/// does not know about still decodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginVersion {
    pub download_urls: BTreeMap<String, String>,
}

impl PluginVersion {
    pub fn download_url(&self, os: OperatingSystem) -> Option<&str> {
        self.download_urls.get(os.as_str()).map(String::as_str)
    }
}

impl PluginManifests {
    /// Decode a catalog document and reject structurally unusable entries.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifests: PluginManifests = serde_json::from_slice(bytes).map_err(PluginError::Decode)?;
        manifests.validate()?;
        Ok(manifests)
    }

    pub fn validate(&self) -> Result<()> {
        let kinds = [
            ("provisioner", &self.provisioner_plugins),
            ("agent-service", &self.agent_service_plugins),
        ];
        for (kind, plugins) in kinds {
            for (name, manifest) in plugins {
                for (version, build) in &manifest.versions {
                    if build.download_urls.is_empty() {
                        return Err(PluginError::InvalidManifest(format!(
                            "{kind} plugin '{name}' version '{version}' has no download urls"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Parse a version key, accepting an optional leading `v`.
pub fn parse_version(key: &str) -> Option<Version> {
    Version::parse(key.strip_prefix('v').unwrap_or(key)).ok()
}

/// The highest semantic version in `manifest`, ignoring the `latest` alias
/// and keys that are not valid semver.
pub fn find_latest_version(manifest: &PluginManifest) -> Option<(&str, &PluginVersion)> {
    manifest
        .versions
        .iter()
        .filter(|(key, _)| key.as_str() != LATEST_ALIAS)
        .filter_map(|(key, build)| match parse_version(key) {
            Some(version) => Some((version, key.as_str(), build)),
            None => {
                warn!(version = %key, "Skipping plugin version that is not valid semver");
                None
            }
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, key, build)| (key, build))
}

/// Pick the build to install for every plugin flagged `default`.
///
/// An explicit `latest` entry wins; otherwise the highest semantic version.
/// Default plugins with no usable version are left out.
pub fn get_default_plugins(
    plugins: &BTreeMap<String, PluginManifest>,
) -> BTreeMap<String, PluginVersion> {
    let mut defaults = BTreeMap::new();

    for (name, manifest) in plugins.iter().filter(|(_, m)| m.default) {
        let chosen = match manifest.versions.get(LATEST_ALIAS) {
            Some(latest) => Some((LATEST_ALIAS, latest)),
            None => find_latest_version(manifest),
        };

        match chosen {
            Some((version, build)) => {
                debug!(plugin = %name, version = %version, "Selected default plugin version");
                defaults.insert(name.clone(), build.clone());
            }
            None => warn!(plugin = %name, "Default plugin has no installable version"),
        }
    }

    defaults
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(url: &str) -> PluginVersion {
        PluginVersion {
            download_urls: BTreeMap::from([("linux-amd64".to_string(), url.to_string())]),
        }
    }

    fn manifest(default: bool, versions: &[&str]) -> PluginManifest {
        PluginManifest {
            default,
            versions: versions
                .iter()
                .map(|v| (v.to_string(), build(&format!("https://dl.example.com/{v}"))))
                .collect(),
        }
    }

    #[test]
    fn test_latest_excludes_alias() {
        let m = manifest(true, &["v1.0.0", "v1.2.0", "latest"]);
        let (key, version) = find_latest_version(&m).unwrap();
        assert_eq!(key, "v1.2.0");
        assert_eq!(
            version.download_urls["linux-amd64"],
            "https://dl.example.com/v1.2.0"
        );
    }

    #[test]
    fn test_semver_not_string_ordering() {
        let m = manifest(false, &["v0.9.0", "v0.10.0", "v0.2.0"]);
        assert_eq!(find_latest_version(&m).unwrap().0, "v0.10.0");

        let m = manifest(false, &["1.0.0-rc.1", "1.0.0"]);
        assert_eq!(find_latest_version(&m).unwrap().0, "1.0.0");
    }

    #[test]
    fn test_no_comparable_versions() {
        assert!(find_latest_version(&manifest(true, &[])).is_none());
        assert!(find_latest_version(&manifest(true, &["latest", "nightly"])).is_none());
    }

    #[test]
    fn test_defaults_prefer_latest_alias() {
        let plugins = BTreeMap::from([
            ("docker".to_string(), manifest(true, &["v1.0.0", "latest"])),
            ("aws".to_string(), manifest(true, &["v0.1.0", "v0.3.0"])),
            ("gcp".to_string(), manifest(false, &["v2.0.0"])),
            ("broken".to_string(), manifest(true, &["nightly"])),
        ]);

        let defaults = get_default_plugins(&plugins);
        assert_eq!(defaults.len(), 2);
        assert_eq!(
            defaults["docker"].download_urls["linux-amd64"],
            "https://dl.example.com/latest"
        );
        assert_eq!(
            defaults["aws"].download_urls["linux-amd64"],
            "https://dl.example.com/v0.3.0"
        );
    }

    #[test]
    fn test_decode_catalog() {
        let json = br#"{
            "provisionerPlugins": {
                "docker-provider": {
                    "default": true,
                    "versions": {
                        "v0.1.0": {"downloadUrls": {"linux-amd64": "https://a", "plan9-mips": "https://b"}}
                    }
                }
            }
        }"#;

        let manifests = PluginManifests::from_json(json).unwrap();
        assert!(manifests.agent_service_plugins.is_empty());
        let docker = &manifests.provisioner_plugins["docker-provider"];
        assert!(docker.default);
        assert_eq!(
            docker.versions["v0.1.0"].download_url(OperatingSystem::LinuxAmd64),
            Some("https://a")
        );
        assert_eq!(
            docker.versions["v0.1.0"].download_url(OperatingSystem::DarwinArm64),
            None
        );
    }

    #[test]
    fn test_decode_rejects_empty_download_urls() {
        let json = br#"{"agentServicePlugins": {"mesh": {"versions": {"v1.0.0": {"downloadUrls": {}}}}}}"#;
        let err = PluginManifests::from_json(json).unwrap_err();
        assert!(matches!(err, PluginError::InvalidManifest(_)));
        assert!(err.to_string().contains("mesh"));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let json = br#"{"provisionerPlugins": {"docker": {"versions": ["v1"]}}}"#;
        assert!(matches!(
            PluginManifests::from_json(json),
            Err(PluginError::Decode(_))
        ));
    }
}
