//! What differs between plugin kinds: handshake cookie, client type, the
//! initialization call made right after a plugin comes up and the one-time
//! setup run the first time it is installed.

use crate::profiles::ProfileStore;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use ws_core::{Profile, ProfileProvisioner};
use ws_provider::{
    AgentService, AgentServiceClient, AgentServiceInfo, InitializeAgentServiceRequest,
    InitializeProviderRequest, ProviderInfo, Provisioner, ProvisionerClient,
    AGENT_SERVICE_HANDSHAKE, PROVISIONER_HANDSHAKE,
};
use ws_rpc::{Connection, HandshakeConfig};

/// Server identity handed to plugins on initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerIdentity {
    pub server_version: String,
    pub server_url: String,
    pub api_url: String,
    pub api_port: u16,
    pub server_download_url: String,
    pub logs_dir: PathBuf,
}

#[async_trait]
pub trait PluginKind: Send + Sync + 'static {
    type Client: Send + Sync + 'static;
    type Info: Clone + Debug + Send + Sync + 'static;

    /// Human-readable kind, used in errors and logs.
    fn label(&self) -> &'static str;

    fn handshake(&self) -> HandshakeConfig;

    fn client(&self, connection: Connection) -> Self::Client;

    /// Initialize a freshly started plugin and fetch its self-description.
    async fn initialize(&self, client: &Self::Client, install_dir: &Path) -> ws_rpc::Result<Self::Info>;

    /// Runs once per install directory, after the first successful
    /// initialization. The registry writes the setup lock afterwards.
    async fn first_setup(&self, _name: &str, _client: &Self::Client, _info: &Self::Info) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct ProvisionerKind {
    identity: ServerIdentity,
    profiles: Option<Arc<dyn ProfileStore>>,
}

impl ProvisionerKind {
    pub fn new(identity: ServerIdentity) -> Self {
        Self {
            identity,
            profiles: None,
        }
    }

    /// Seed `store` with each provisioner's preset profiles on first setup.
    pub fn with_profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(store);
        self
    }
}

impl Debug for ProvisionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionerKind")
            .field("identity", &self.identity)
            .field("profiles", &self.profiles.is_some())
            .finish()
    }
}

#[async_trait]
impl PluginKind for ProvisionerKind {
    type Client = ProvisionerClient;
    type Info = ProviderInfo;

    fn label(&self) -> &'static str {
        "provisioner"
    }

    fn handshake(&self) -> HandshakeConfig {
        PROVISIONER_HANDSHAKE
    }

    fn client(&self, connection: Connection) -> ProvisionerClient {
        ProvisionerClient::new(connection)
    }

    async fn initialize(&self, client: &ProvisionerClient, install_dir: &Path) -> ws_rpc::Result<ProviderInfo> {
        let identity = &self.identity;
        client
            .initialize(InitializeProviderRequest {
                base_path: install_dir.to_string_lossy().into_owned(),
                server_download_url: identity.server_download_url.clone(),
                server_version: identity.server_version.clone(),
                server_url: identity.server_url.clone(),
                api_url: identity.api_url.clone(),
                logs_dir: identity.logs_dir.to_string_lossy().into_owned(),
                api_port: identity.api_port,
            })
            .await?;
        client.get_info().await
    }

    async fn first_setup(&self, name: &str, client: &ProvisionerClient, info: &ProviderInfo) -> anyhow::Result<()> {
        let Some(store) = &self.profiles else {
            return Ok(());
        };

        let existing: HashSet<String> = store
            .list()
            .await
            .context("failed to list profiles")?
            .into_iter()
            .map(|p| p.name)
            .collect();
        let presets = client
            .get_preset_profiles()
            .await
            .context("failed to get preset profiles")?;

        info!(plugin = name, count = presets.len(), "Setting preset profiles");
        for preset in presets {
            if existing.contains(&preset.name) {
                info!(plugin = name, profile = %preset.name, "Profile already exists, skipping");
                continue;
            }
            let profile = Profile {
                name: preset.name,
                provisioner: ProfileProvisioner {
                    name: info.name.clone(),
                    version: info.version.clone(),
                },
                options: preset.options,
            };
            match store.save(&profile).await {
                Ok(()) => info!(plugin = name, profile = %profile.name, "Preset profile set"),
                Err(e) => error!(plugin = name, profile = %profile.name, error = %e, "Failed to set preset profile"),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentServiceKind {
    identity: ServerIdentity,
}

impl AgentServiceKind {
    pub fn new(identity: ServerIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl PluginKind for AgentServiceKind {
    type Client = AgentServiceClient;
    type Info = AgentServiceInfo;

    fn label(&self) -> &'static str {
        "agent-service"
    }

    fn handshake(&self) -> HandshakeConfig {
        AGENT_SERVICE_HANDSHAKE
    }

    fn client(&self, connection: Connection) -> AgentServiceClient {
        AgentServiceClient::new(connection)
    }

    async fn initialize(&self, client: &AgentServiceClient, install_dir: &Path) -> ws_rpc::Result<AgentServiceInfo> {
        client
            .initialize(InitializeAgentServiceRequest {
                base_path: install_dir.to_string_lossy().into_owned(),
                server_url: self.identity.server_url.clone(),
                server_version: self.identity.server_version.clone(),
            })
            .await?;
        client.get_info().await
    }
}
