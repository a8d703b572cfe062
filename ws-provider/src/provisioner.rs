//! Provisioner plugins create, start, stop and destroy workspaces and
//! projects on some backend (containers, VMs, cloud instances).

use crate::types::{
    InitializeProviderRequest, PresetProfile, ProjectInfo, ProjectRequest, ProviderInfo,
    WorkspaceInfo, WorkspaceRequest,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use ws_rpc::{Connection, Dispatch, Error, HandshakeConfig, Result, ServeError};

/// Handshake contract for provisioner plugins.
pub const PROVISIONER_HANDSHAKE: HandshakeConfig = HandshakeConfig {
    protocol_version: 1,
    magic_cookie_key: "WS_PROVISIONER_PLUGIN",
    magic_cookie_value: "ws_provisioner",
};

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn initialize(&self, request: InitializeProviderRequest) -> Result<()>;
    async fn get_info(&self) -> Result<ProviderInfo>;
    /// Profile options schema or defaults, opaque to the server.
    async fn configure(&self) -> Result<serde_json::Value>;
    async fn get_preset_profiles(&self) -> Result<Vec<PresetProfile>>;

    async fn create_workspace(&self, request: WorkspaceRequest) -> Result<()>;
    async fn start_workspace(&self, request: WorkspaceRequest) -> Result<()>;
    async fn stop_workspace(&self, request: WorkspaceRequest) -> Result<()>;
    async fn destroy_workspace(&self, request: WorkspaceRequest) -> Result<()>;
    async fn get_workspace_info(&self, request: WorkspaceRequest) -> Result<WorkspaceInfo>;

    async fn create_project(&self, request: ProjectRequest) -> Result<()>;
    async fn start_project(&self, request: ProjectRequest) -> Result<()>;
    async fn stop_project(&self, request: ProjectRequest) -> Result<()>;
    async fn destroy_project(&self, request: ProjectRequest) -> Result<()>;
    async fn get_project_info(&self, request: ProjectRequest) -> Result<ProjectInfo>;
}

/// One variant per operation; the tag is the wire method name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ProvisionerRequest {
    Initialize(InitializeProviderRequest),
    GetInfo,
    Configure,
    GetPresetProfiles,
    CreateWorkspace(WorkspaceRequest),
    StartWorkspace(WorkspaceRequest),
    StopWorkspace(WorkspaceRequest),
    DestroyWorkspace(WorkspaceRequest),
    GetWorkspaceInfo(WorkspaceRequest),
    CreateProject(ProjectRequest),
    StartProject(ProjectRequest),
    StopProject(ProjectRequest),
    DestroyProject(ProjectRequest),
    GetProjectInfo(ProjectRequest),
}

impl ProvisionerRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::GetInfo => "get_info",
            Self::Configure => "configure",
            Self::GetPresetProfiles => "get_preset_profiles",
            Self::CreateWorkspace(_) => "create_workspace",
            Self::StartWorkspace(_) => "start_workspace",
            Self::StopWorkspace(_) => "stop_workspace",
            Self::DestroyWorkspace(_) => "destroy_workspace",
            Self::GetWorkspaceInfo(_) => "get_workspace_info",
            Self::CreateProject(_) => "create_project",
            Self::StartProject(_) => "start_project",
            Self::StopProject(_) => "stop_project",
            Self::DestroyProject(_) => "destroy_project",
            Self::GetProjectInfo(_) => "get_project_info",
        }
    }
}

/// Server-side view of a provisioner running in a child process.
pub struct ProvisionerClient {
    connection: Connection,
}

impl ProvisionerClient {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Provisioner for ProvisionerClient {
    async fn initialize(&self, request: InitializeProviderRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::Initialize(request))
            .await
    }

    async fn get_info(&self) -> Result<ProviderInfo> {
        self.connection.call(&ProvisionerRequest::GetInfo).await
    }

    async fn configure(&self) -> Result<serde_json::Value> {
        self.connection.call(&ProvisionerRequest::Configure).await
    }

    async fn get_preset_profiles(&self) -> Result<Vec<PresetProfile>> {
        self.connection
            .call(&ProvisionerRequest::GetPresetProfiles)
            .await
    }

    async fn create_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::CreateWorkspace(request))
            .await
    }

    async fn start_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::StartWorkspace(request))
            .await
    }

    async fn stop_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::StopWorkspace(request))
            .await
    }

    async fn destroy_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::DestroyWorkspace(request))
            .await
    }

    async fn get_workspace_info(&self, request: WorkspaceRequest) -> Result<WorkspaceInfo> {
        self.connection
            .call(&ProvisionerRequest::GetWorkspaceInfo(request))
            .await
    }

    async fn create_project(&self, request: ProjectRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::CreateProject(request))
            .await
    }

    async fn start_project(&self, request: ProjectRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::StartProject(request))
            .await
    }

    async fn stop_project(&self, request: ProjectRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::StopProject(request))
            .await
    }

    async fn destroy_project(&self, request: ProjectRequest) -> Result<()> {
        self.connection
            .call(&ProvisionerRequest::DestroyProject(request))
            .await
    }

    async fn get_project_info(&self, request: ProjectRequest) -> Result<ProjectInfo> {
        self.connection
            .call(&ProvisionerRequest::GetProjectInfo(request))
            .await
    }
}

/// Plugin-side adapter: decodes requests and calls the real provisioner.
///
/// Every call other than `initialize` is refused until `initialize` has
/// succeeded.
pub struct ProvisionerServer<P> {
    provisioner: P,
    initialized: AtomicBool,
}

impl<P: Provisioner> ProvisionerServer<P> {
    pub fn new(provisioner: P) -> Self {
        Self {
            provisioner,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &P {
        &self.provisioner
    }
}

#[async_trait]
impl<P: Provisioner + 'static> Dispatch for ProvisionerServer<P> {
    type Request = ProvisionerRequest;

    async fn dispatch(&self, request: ProvisionerRequest) -> Result<serde_json::Value> {
        debug!(method = request.method(), "Dispatching provisioner request");

        if let ProvisionerRequest::Initialize(args) = request {
            self.provisioner.initialize(args).await?;
            self.initialized.store(true, Ordering::SeqCst);
            return to_value(());
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::application(format!(
                "{} called before initialize",
                request.method()
            )));
        }

        let p = &self.provisioner;
        match request {
            ProvisionerRequest::Initialize(_) => to_value(()),
            ProvisionerRequest::GetInfo => to_value(p.get_info().await?),
            ProvisionerRequest::Configure => p.configure().await,
            ProvisionerRequest::GetPresetProfiles => to_value(p.get_preset_profiles().await?),
            ProvisionerRequest::CreateWorkspace(r) => to_value(p.create_workspace(r).await?),
            ProvisionerRequest::StartWorkspace(r) => to_value(p.start_workspace(r).await?),
            ProvisionerRequest::StopWorkspace(r) => to_value(p.stop_workspace(r).await?),
            ProvisionerRequest::DestroyWorkspace(r) => to_value(p.destroy_workspace(r).await?),
            ProvisionerRequest::GetWorkspaceInfo(r) => to_value(p.get_workspace_info(r).await?),
            ProvisionerRequest::CreateProject(r) => to_value(p.create_project(r).await?),
            ProvisionerRequest::StartProject(r) => to_value(p.start_project(r).await?),
            ProvisionerRequest::StopProject(r) => to_value(p.stop_project(r).await?),
            ProvisionerRequest::DestroyProject(r) => to_value(p.destroy_project(r).await?),
            ProvisionerRequest::GetProjectInfo(r) => to_value(p.get_project_info(r).await?),
        }
    }
}

pub(crate) fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::transport(format!("failed to encode result: {e}")))
}

/// Entry point for a provisioner plugin binary.
pub async fn serve_provisioner<P: Provisioner + 'static>(
    provisioner: P,
) -> std::result::Result<(), ServeError> {
    ws_rpc::serve(&PROVISIONER_HANDSHAKE, ProvisionerServer::new(provisioner)).await
}
