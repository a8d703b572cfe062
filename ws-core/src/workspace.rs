use serde::{Deserialize, Serialize};

/// Names the plugin that provisions a workspace and the configuration
/// profile it should use. Fixed for the lifetime of the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceProvisioner {
    pub plugin_name: String,
    pub profile_name: String,
}

impl WorkspaceProvisioner {
    pub fn new(plugin_name: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            profile_name: profile_name.into(),
        }
    }
}

/// Where a project's source comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    /// Sub-path inside the repository the project is rooted at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Repository {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    /// Back-reference to the owning workspace's id.
    pub workspace_id: String,
    pub repository: Repository,
    /// Mesh-network key issued when the project was created.
    pub auth_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub projects: Vec<Project>,
    pub provisioner: WorkspaceProvisioner,
}

impl Workspace {
    /// Look up one of the workspace's projects by name.
    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn project_names(&self) -> Vec<&str> {
        self.projects.iter().map(|p| p.name.as_str()).collect()
    }
}
