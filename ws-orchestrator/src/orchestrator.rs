use crate::error::{OrchestratorError, Result};
use crate::network::NetworkKeyIssuer;
use crate::resolver::ProvisionerResolver;
use crate::store::WorkspaceStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use ws_core::{
    validate_project_name, validate_workspace_name, Project, Repository, ValidationError,
    Workspace, WorkspaceProvisioner,
};
use ws_events::{Event, EventBus, EventName};
use ws_provider::{ProjectInfo, ProjectRequest, Provisioner, WorkspaceInfo, WorkspaceRequest};
use ws_registry::ProfileStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub repository: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub projects: Vec<CreateProjectRequest>,
    pub provisioner: WorkspaceProvisioner,
}

/// Workspace-level provider info plus one entry per project, in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDetails {
    pub workspace: Workspace,
    pub info: WorkspaceInfo,
}

/// Sequences provisioner plugin calls for workspace lifecycle operations
/// and publishes lifecycle events around them.
///
/// Project operations within one call run strictly in declaration order.
/// The first plugin failure aborts the rest of the sequence; nothing that
/// already succeeded is rolled back. Cloning is cheap, so each operation
/// can run on its own task.
#[derive(Clone)]
pub struct WorkspaceOrchestrator {
    store: Arc<dyn WorkspaceStore>,
    provisioners: Arc<dyn ProvisionerResolver>,
    keys: Arc<dyn NetworkKeyIssuer>,
    events: EventBus,
    profiles: Option<Arc<dyn ProfileStore>>,
    plugin_call_timeout: Option<Duration>,
}

impl WorkspaceOrchestrator {
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        provisioners: Arc<dyn ProvisionerResolver>,
        keys: Arc<dyn NetworkKeyIssuer>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            provisioners,
            keys,
            events,
            profiles: None,
            plugin_call_timeout: None,
        }
    }

    /// Require every new workspace to name a profile of its provisioner
    /// that exists in `profiles`.
    pub fn with_profile_store(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Bound every plugin call; an overrun fails with a `timeout` error.
    pub fn with_plugin_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.plugin_call_timeout = timeout;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validate a create request and assemble the workspace it describes,
    /// issuing one network key per project. Nothing is stored.
    pub async fn build_workspace(&self, request: CreateWorkspaceRequest) -> Result<Workspace> {
        validate_workspace_name(&request.name)?;

        let mut seen = HashSet::new();
        for project in &request.projects {
            validate_project_name(&project.name)?;
            if !seen.insert(project.name.as_str()) {
                return Err(ValidationError::DuplicateProject(project.name.clone()).into());
            }
        }

        let mut projects = Vec::with_capacity(request.projects.len());
        for project in request.projects {
            let auth_key = self
                .keys
                .create_auth_key()
                .await
                .map_err(OrchestratorError::AuthKey)?;
            projects.push(Project {
                name: project.name,
                workspace_id: request.name.clone(),
                repository: project.repository,
                auth_key,
            });
        }

        Ok(Workspace {
            id: request.name.clone(),
            name: request.name,
            projects,
            provisioner: request.provisioner,
        })
    }

    pub async fn find_workspace(&self, id: &str) -> Result<Workspace> {
        self.store
            .find(id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.store.list().await.map_err(OrchestratorError::Store)
    }

    /// Save `workspace`, then create it and each of its projects through
    /// its provisioner.
    pub async fn create_workspace(&self, workspace: &Workspace) -> Result<()> {
        if self
            .store
            .find(&workspace.id)
            .await
            .map_err(OrchestratorError::Store)?
            .is_some()
        {
            return Err(OrchestratorError::AlreadyExists(workspace.id.clone()));
        }
        let provisioner = self.resolve(workspace)?;
        self.check_profile(&workspace.provisioner).await?;

        self.store
            .save(workspace)
            .await
            .map_err(OrchestratorError::Store)?;
        info!(workspace = %workspace.name, plugin = %workspace.provisioner.plugin_name, "Creating workspace");

        self.publish_workspace(EventName::Creating, workspace).await;
        self.call(
            "create_workspace",
            &workspace.name,
            provisioner.create_workspace(workspace_request(workspace)),
        )
        .await?;

        for project in &workspace.projects {
            self.publish_project(EventName::ProjectCreating, workspace, project)
                .await;
            self.call(
                "create_project",
                &project.name,
                provisioner.create_project(project_request(workspace, project)),
            )
            .await?;
            self.publish_project(EventName::ProjectCreated, workspace, project)
                .await;
        }

        self.publish_workspace(EventName::Created, workspace).await;
        info!(workspace = %workspace.name, projects = workspace.projects.len(), "Workspace created");
        Ok(())
    }

    pub async fn start_workspace(&self, workspace: &Workspace) -> Result<()> {
        let provisioner = self.resolve(workspace)?;
        info!(workspace = %workspace.name, "Starting workspace");

        self.call(
            "start_workspace",
            &workspace.name,
            provisioner.start_workspace(workspace_request(workspace)),
        )
        .await?;
        self.publish_workspace(EventName::Starting, workspace).await;

        for project in &workspace.projects {
            self.start_project_with(provisioner.as_ref(), workspace, project)
                .await?;
        }

        self.publish_workspace(EventName::Started, workspace).await;
        Ok(())
    }

    pub async fn stop_workspace(&self, workspace: &Workspace) -> Result<()> {
        let provisioner = self.resolve(workspace)?;
        info!(workspace = %workspace.name, "Stopping workspace");

        self.call(
            "stop_workspace",
            &workspace.name,
            provisioner.stop_workspace(workspace_request(workspace)),
        )
        .await?;
        self.publish_workspace(EventName::Stopping, workspace).await;

        for project in &workspace.projects {
            self.stop_project_with(provisioner.as_ref(), workspace, project)
                .await?;
        }

        self.publish_workspace(EventName::Stopped, workspace).await;
        Ok(())
    }

    /// Start one project of a stored workspace. Publishes no
    /// workspace-level events.
    pub async fn start_project(&self, workspace_id: &str, project_name: &str) -> Result<()> {
        let workspace = self.find_workspace(workspace_id).await?;
        let project = find_project(&workspace, project_name)?;
        let provisioner = self.resolve(&workspace)?;
        self.start_project_with(provisioner.as_ref(), &workspace, project)
            .await
    }

    pub async fn stop_project(&self, workspace_id: &str, project_name: &str) -> Result<()> {
        let workspace = self.find_workspace(workspace_id).await?;
        let project = find_project(&workspace, project_name)?;
        let provisioner = self.resolve(&workspace)?;
        self.stop_project_with(provisioner.as_ref(), &workspace, project)
            .await
    }

    /// Destroy every project, then the workspace, then drop the stored
    /// record. The record survives any failure.
    pub async fn destroy_workspace(&self, workspace: &Workspace) -> Result<()> {
        let provisioner = self.resolve(workspace)?;
        info!(workspace = %workspace.name, "Destroying workspace");

        self.publish_workspace(EventName::Removing, workspace).await;

        for project in &workspace.projects {
            self.publish_project(EventName::ProjectRemoving, workspace, project)
                .await;
            self.call(
                "destroy_project",
                &project.name,
                provisioner.destroy_project(project_request(workspace, project)),
            )
            .await?;
            self.publish_project(EventName::ProjectRemoved, workspace, project)
                .await;
        }

        self.call(
            "destroy_workspace",
            &workspace.name,
            provisioner.destroy_workspace(workspace_request(workspace)),
        )
        .await?;

        self.store
            .delete(workspace)
            .await
            .map_err(OrchestratorError::Store)?;
        self.publish_workspace(EventName::Removed, workspace).await;
        info!(workspace = %workspace.name, "Workspace destroyed");
        Ok(())
    }

    /// Like [`destroy_workspace`](Self::destroy_workspace) but plugin
    /// failures are logged and skipped, and the record is always deleted.
    /// Works even when the provisioner is gone.
    pub async fn force_destroy_workspace(&self, workspace: &Workspace) -> Result<()> {
        warn!(workspace = %workspace.name, "Force destroying workspace");
        self.publish_workspace(EventName::Removing, workspace).await;

        match self.resolve(workspace) {
            Ok(provisioner) => {
                for project in &workspace.projects {
                    self.publish_project(EventName::ProjectRemoving, workspace, project)
                        .await;
                    if let Err(e) = self
                        .call(
                            "destroy_project",
                            &project.name,
                            provisioner.destroy_project(project_request(workspace, project)),
                        )
                        .await
                    {
                        warn!(workspace = %workspace.name, project = %project.name, error = %e, "Ignoring project destroy failure");
                    }
                    self.publish_project(EventName::ProjectRemoved, workspace, project)
                        .await;
                }
                if let Err(e) = self
                    .call(
                        "destroy_workspace",
                        &workspace.name,
                        provisioner.destroy_workspace(workspace_request(workspace)),
                    )
                    .await
                {
                    warn!(workspace = %workspace.name, error = %e, "Ignoring workspace destroy failure");
                }
            }
            Err(e) => {
                warn!(workspace = %workspace.name, error = %e, "Provisioner unavailable, skipping plugin cleanup");
            }
        }

        if let Err(e) = self.store.delete(workspace).await {
            debug!(workspace = %workspace.name, error = %e, "No stored record to delete");
        }
        self.publish_workspace(EventName::Removed, workspace).await;
        Ok(())
    }

    /// Provider view of the workspace and each of its projects.
    pub async fn get_workspace_info(&self, workspace: &Workspace) -> Result<WorkspaceDetails> {
        let provisioner = self.resolve(workspace)?;

        let mut info = self
            .call(
                "get_workspace_info",
                &workspace.name,
                provisioner.get_workspace_info(workspace_request(workspace)),
            )
            .await?;

        let mut projects: Vec<ProjectInfo> = Vec::with_capacity(workspace.projects.len());
        for project in &workspace.projects {
            let project_info = self
                .call(
                    "get_project_info",
                    &project.name,
                    provisioner.get_project_info(project_request(workspace, project)),
                )
                .await?;
            projects.push(project_info);
        }
        info.projects = projects;

        Ok(WorkspaceDetails {
            workspace: workspace.clone(),
            info,
        })
    }

    async fn start_project_with(
        &self,
        provisioner: &dyn Provisioner,
        workspace: &Workspace,
        project: &Project,
    ) -> Result<()> {
        self.publish_project(EventName::ProjectStarting, workspace, project)
            .await;
        self.call(
            "start_project",
            &project.name,
            provisioner.start_project(project_request(workspace, project)),
        )
        .await?;
        self.publish_project(EventName::ProjectStarted, workspace, project)
            .await;
        Ok(())
    }

    async fn stop_project_with(
        &self,
        provisioner: &dyn Provisioner,
        workspace: &Workspace,
        project: &Project,
    ) -> Result<()> {
        self.publish_project(EventName::ProjectStopping, workspace, project)
            .await;
        self.call(
            "stop_project",
            &project.name,
            provisioner.stop_project(project_request(workspace, project)),
        )
        .await?;
        self.publish_project(EventName::ProjectStopped, workspace, project)
            .await;
        Ok(())
    }

    async fn check_profile(&self, target: &WorkspaceProvisioner) -> Result<()> {
        let Some(profiles) = &self.profiles else {
            return Ok(());
        };
        let found = profiles
            .find(&target.profile_name)
            .await
            .map_err(OrchestratorError::Store)?;
        match found {
            Some(profile) if profile.provisioner.name == target.plugin_name => Ok(()),
            _ => Err(OrchestratorError::ProfileNotFound {
                plugin: target.plugin_name.clone(),
                profile: target.profile_name.clone(),
            }),
        }
    }

    fn resolve(&self, workspace: &Workspace) -> Result<Arc<dyn Provisioner>> {
        let plugin = &workspace.provisioner.plugin_name;
        self.provisioners
            .resolve(plugin)
            .map_err(|source| OrchestratorError::ProvisionerUnavailable {
                plugin: plugin.clone(),
                source,
            })
    }

    async fn call<T, F>(&self, operation: &'static str, subject: &str, call: F) -> Result<T>
    where
        F: Future<Output = ws_rpc::Result<T>>,
    {
        debug!(operation, subject, "Calling provisioner");
        let result = match self.plugin_call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ws_rpc::Error::timeout(format!(
                    "no response within {}ms",
                    limit.as_millis()
                ))),
            },
            None => call.await,
        };
        result.map_err(|source| OrchestratorError::Plugin {
            operation,
            subject: subject.to_string(),
            source,
        })
    }

    async fn publish_workspace(&self, name: EventName, workspace: &Workspace) {
        self.events
            .publish(Event::workspace(name, &workspace.name))
            .await;
    }

    async fn publish_project(&self, name: EventName, workspace: &Workspace, project: &Project) {
        self.events
            .publish(Event::project(name, &workspace.name, &project.name))
            .await;
    }
}

fn find_project<'a>(workspace: &'a Workspace, name: &str) -> Result<&'a Project> {
    workspace
        .project(name)
        .ok_or_else(|| OrchestratorError::ProjectNotFound {
            workspace: workspace.name.clone(),
            project: name.to_string(),
        })
}

fn workspace_request(workspace: &Workspace) -> WorkspaceRequest {
    WorkspaceRequest {
        profile: workspace.provisioner.profile_name.clone(),
        workspace: workspace.clone(),
    }
}

fn project_request(workspace: &Workspace, project: &Project) -> ProjectRequest {
    ProjectRequest {
        profile: workspace.provisioner.profile_name.clone(),
        project: project.clone(),
    }
}
