//! In-process plugin implementations that record every call.

use crate::agent_service::AgentService;
use crate::provisioner::Provisioner;
use crate::types::{
    AgentServiceInfo, InitializeAgentServiceRequest, InitializeProviderRequest, PresetProfile,
    ProjectHookRequest, ProjectInfo, ProjectRequest, ProviderInfo, WorkspaceInfo,
    WorkspaceRequest,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use ws_rpc::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProvisionerCall {
    Initialize,
    GetInfo,
    Configure,
    GetPresetProfiles,
    CreateWorkspace(String),
    StartWorkspace(String),
    StopWorkspace(String),
    DestroyWorkspace(String),
    GetWorkspaceInfo(String),
    CreateProject(String),
    StartProject(String),
    StopProject(String),
    DestroyProject(String),
    GetProjectInfo(String),
}

#[derive(Debug, Default)]
struct ProvisionerState {
    calls: Vec<ProvisionerCall>,
    failures: Vec<ProvisionerCall>,
    initialized_with: Option<InitializeProviderRequest>,
    delay: Option<Duration>,
    presets: Vec<PresetProfile>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Provisioner that succeeds unless told otherwise. Clones share state.
#[derive(Debug, Clone)]
pub struct MockProvisioner {
    name: String,
    state: Arc<Mutex<ProvisionerState>>,
}

impl MockProvisioner {
    /// Ships a single `<name>-local` preset profile.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let presets = vec![PresetProfile {
            name: format!("{name}-local"),
            options: serde_json::json!({ "mock": true }),
        }];
        Self {
            name,
            state: Arc::new(Mutex::new(ProvisionerState {
                presets,
                ..Default::default()
            })),
        }
    }

    pub fn set_presets(&self, presets: Vec<PresetProfile>) {
        lock(&self.state).presets = presets;
    }

    /// Make `call` return an application error (it is still recorded).
    pub fn fail_on(&self, call: ProvisionerCall) {
        lock(&self.state).failures.push(call);
    }

    /// Sleep this long inside every workspace and project operation.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<ProvisionerCall> {
        lock(&self.state).calls.clone()
    }

    pub fn initialized_with(&self) -> Option<InitializeProviderRequest> {
        lock(&self.state).initialized_with.clone()
    }

    async fn record(&self, call: ProvisionerCall) -> Result<()> {
        let (fail, delay) = {
            let mut state = lock(&self.state);
            state.calls.push(call.clone());
            (state.failures.contains(&call), state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::application(format!("mock failure on {call:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn initialize(&self, request: InitializeProviderRequest) -> Result<()> {
        lock(&self.state).initialized_with = Some(request);
        self.record(ProvisionerCall::Initialize).await
    }

    async fn get_info(&self) -> Result<ProviderInfo> {
        self.record(ProvisionerCall::GetInfo).await?;
        Ok(ProviderInfo {
            name: self.name.clone(),
            version: "0.0.0-mock".to_string(),
            label: Some("Mock".to_string()),
        })
    }

    async fn configure(&self) -> Result<serde_json::Value> {
        self.record(ProvisionerCall::Configure).await?;
        Ok(serde_json::json!({ "mock": true }))
    }

    async fn get_preset_profiles(&self) -> Result<Vec<PresetProfile>> {
        self.record(ProvisionerCall::GetPresetProfiles).await?;
        Ok(lock(&self.state).presets.clone())
    }

    async fn create_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.record(ProvisionerCall::CreateWorkspace(request.workspace.name))
            .await
    }

    async fn start_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.record(ProvisionerCall::StartWorkspace(request.workspace.name))
            .await
    }

    async fn stop_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.record(ProvisionerCall::StopWorkspace(request.workspace.name))
            .await
    }

    async fn destroy_workspace(&self, request: WorkspaceRequest) -> Result<()> {
        self.record(ProvisionerCall::DestroyWorkspace(request.workspace.name))
            .await
    }

    async fn get_workspace_info(&self, request: WorkspaceRequest) -> Result<WorkspaceInfo> {
        let name = request.workspace.name;
        self.record(ProvisionerCall::GetWorkspaceInfo(name.clone()))
            .await?;
        Ok(WorkspaceInfo {
            name,
            provider_metadata: Some(format!("{}-metadata", self.name)),
            projects: Vec::new(),
        })
    }

    async fn create_project(&self, request: ProjectRequest) -> Result<()> {
        self.record(ProvisionerCall::CreateProject(request.project.name))
            .await
    }

    async fn start_project(&self, request: ProjectRequest) -> Result<()> {
        self.record(ProvisionerCall::StartProject(request.project.name))
            .await
    }

    async fn stop_project(&self, request: ProjectRequest) -> Result<()> {
        self.record(ProvisionerCall::StopProject(request.project.name))
            .await
    }

    async fn destroy_project(&self, request: ProjectRequest) -> Result<()> {
        self.record(ProvisionerCall::DestroyProject(request.project.name))
            .await
    }

    async fn get_project_info(&self, request: ProjectRequest) -> Result<ProjectInfo> {
        let name = request.project.name;
        self.record(ProvisionerCall::GetProjectInfo(name.clone()))
            .await?;
        Ok(ProjectInfo {
            name,
            is_running: true,
            created: true,
            provider_metadata: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentServiceCall {
    Initialize,
    GetInfo,
    ProjectPreInit(String),
    ProjectPostInit(String),
    ProjectPreStart(String),
    ProjectPostStart(String),
    ProjectPreStop(String),
    LivenessProbeTimeout,
    LivenessProbe,
}

#[derive(Debug, Default)]
struct AgentServiceState {
    calls: Vec<AgentServiceCall>,
    initialized_with: Option<InitializeAgentServiceRequest>,
    probe_delay: Option<Duration>,
    probe_timeout_secs: u64,
}

/// Agent service with a configurable liveness probe.
#[derive(Debug, Clone)]
pub struct MockAgentService {
    name: String,
    state: Arc<Mutex<AgentServiceState>>,
}

impl MockAgentService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(AgentServiceState {
                probe_timeout_secs: 5,
                ..Default::default()
            })),
        }
    }

    /// Make the liveness probe take this long to answer.
    pub fn set_probe_delay(&self, delay: Duration) {
        lock(&self.state).probe_delay = Some(delay);
    }

    pub fn set_probe_timeout_secs(&self, secs: u64) {
        lock(&self.state).probe_timeout_secs = secs;
    }

    pub fn calls(&self) -> Vec<AgentServiceCall> {
        lock(&self.state).calls.clone()
    }

    pub fn initialized_with(&self) -> Option<InitializeAgentServiceRequest> {
        lock(&self.state).initialized_with.clone()
    }

    fn record(&self, call: AgentServiceCall) {
        lock(&self.state).calls.push(call);
    }
}

#[async_trait]
impl AgentService for MockAgentService {
    async fn initialize(&self, request: InitializeAgentServiceRequest) -> Result<()> {
        let mut state = lock(&self.state);
        state.initialized_with = Some(request);
        state.calls.push(AgentServiceCall::Initialize);
        Ok(())
    }

    async fn get_info(&self) -> Result<AgentServiceInfo> {
        self.record(AgentServiceCall::GetInfo);
        Ok(AgentServiceInfo {
            name: self.name.clone(),
            version: "0.0.0-mock".to_string(),
        })
    }

    async fn project_pre_init(&self, request: ProjectHookRequest) -> Result<()> {
        self.record(AgentServiceCall::ProjectPreInit(request.project.name));
        Ok(())
    }

    async fn project_post_init(&self, request: ProjectHookRequest) -> Result<()> {
        self.record(AgentServiceCall::ProjectPostInit(request.project.name));
        Ok(())
    }

    async fn project_pre_start(&self, request: ProjectHookRequest) -> Result<()> {
        self.record(AgentServiceCall::ProjectPreStart(request.project.name));
        Ok(())
    }

    async fn project_post_start(&self, request: ProjectHookRequest) -> Result<()> {
        self.record(AgentServiceCall::ProjectPostStart(request.project.name));
        Ok(())
    }

    async fn project_pre_stop(&self, request: ProjectHookRequest) -> Result<()> {
        self.record(AgentServiceCall::ProjectPreStop(request.project.name));
        Ok(())
    }

    async fn liveness_probe_timeout(&self) -> Result<u64> {
        let mut state = lock(&self.state);
        state.calls.push(AgentServiceCall::LivenessProbeTimeout);
        Ok(state.probe_timeout_secs)
    }

    async fn liveness_probe(&self) -> Result<()> {
        let delay = {
            let mut state = lock(&self.state);
            state.calls.push(AgentServiceCall::LivenessProbe);
            state.probe_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
