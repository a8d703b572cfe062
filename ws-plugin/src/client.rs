use crate::error::{PluginError, Result};
use crate::manifest::{get_default_plugins, PluginManifest, PluginManifests};
use futures_util::StreamExt;
use reqwest::Client;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;
use ws_platform::fs::{create_private_dir_all, is_setup_locked, make_executable};
use ws_platform::{plugin_install_path, OperatingSystem};

const MANIFEST_FILE: &str = "manifest.json";

/// HTTP access to a plugin registry: its catalog and the binaries it lists.
#[derive(Debug, Clone)]
pub struct ManifestClient {
    http: Client,
    registry_url: Url,
}

impl ManifestClient {
    pub fn new(registry_url: &str, timeout: Duration) -> Result<Self> {
        let mut registry_url = Url::parse(registry_url).map_err(|e| PluginError::InvalidUrl {
            url: registry_url.to_string(),
            reason: e.to_string(),
        })?;
        if !registry_url.path().ends_with('/') {
            let path = format!("{}/", registry_url.path());
            registry_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ws-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PluginError::Http {
                url: registry_url.to_string(),
                source: e,
            })?;

        Ok(Self { http, registry_url })
    }

    pub fn registry_url(&self) -> &Url {
        &self.registry_url
    }

    /// Fetch and decode `<registry>/manifest.json` in one request.
    pub async fn get_manifest(&self) -> Result<PluginManifests> {
        let url = self
            .registry_url
            .join(MANIFEST_FILE)
            .map_err(|e| PluginError::InvalidUrl {
                url: self.registry_url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(url = %url, "Fetching plugin manifest");

        let response = self.get(url.as_str()).await?;
        let body = response.bytes().await.map_err(|e| PluginError::Http {
            url: url.to_string(),
            source: e,
        })?;

        PluginManifests::from_json(&body)
    }

    /// Download the build for the running platform to `install_path`.
    ///
    /// The binary is streamed to a temporary file next to `install_path`
    /// and moved into place only once the transfer is complete, so a file
    /// at `install_path` is always a whole download.
    pub async fn download_plugin(
        &self,
        download_urls: &BTreeMap<String, String>,
        install_path: &Path,
    ) -> Result<()> {
        let os = OperatingSystem::current()?;
        self.download_plugin_for(os, download_urls, install_path)
            .await
    }

    pub async fn download_plugin_for(
        &self,
        os: OperatingSystem,
        download_urls: &BTreeMap<String, String>,
        install_path: &Path,
    ) -> Result<()> {
        let url = download_urls
            .get(os.as_str())
            .ok_or(PluginError::NoDownloadForPlatform { os })?;

        let io_err = |source| PluginError::Io {
            path: install_path.to_path_buf(),
            source,
        };

        let parent = install_path
            .parent()
            .ok_or_else(|| io_err(io::Error::other("install path has no parent directory")))?;
        create_private_dir_all(parent).map_err(io_err)?;

        info!(url = %url, path = %install_path.display(), "Downloading plugin");
        let response = self.get(url).await?;

        let partial = NamedTempFile::new_in(parent).map_err(io_err)?;
        let mut file = tokio::fs::File::from_std(partial.reopen().map_err(io_err)?);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PluginError::Http {
                url: url.clone(),
                source: e,
            })?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        make_executable(partial.path()).map_err(io_err)?;
        partial
            .persist(install_path)
            .map_err(|e| io_err(e.error))?;
        debug!(bytes = written, path = %install_path.display(), "Plugin downloaded");
        Ok(())
    }

    /// Make sure every default plugin in `plugins` is present under `base`.
    ///
    /// Plugins already on disk are not downloaded again, and neither are
    /// plugins that were uninstalled after their first setup. A plugin whose
    /// download fails is logged and left out of the result.
    pub async fn install_default_plugins(
        &self,
        plugins: &BTreeMap<String, PluginManifest>,
        base: &Path,
    ) -> Vec<PathBuf> {
        let mut installed = Vec::new();

        for (name, version) in get_default_plugins(plugins) {
            let path = plugin_install_path(base, &name);
            if path.is_file() {
                debug!(plugin = %name, "Default plugin already installed");
                installed.push(path);
                continue;
            }
            if path.parent().is_some_and(is_setup_locked) {
                info!(plugin = %name, "Default plugin was uninstalled, not reinstalling");
                continue;
            }

            match self.download_plugin(&version.download_urls, &path).await {
                Ok(()) => installed.push(path),
                Err(e) => warn!(plugin = %name, error = %e, "Failed to install default plugin"),
            }
        }

        installed
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PluginError::Http {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}
