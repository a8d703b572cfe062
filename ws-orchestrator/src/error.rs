use thiserror::Error;
use ws_core::ValidationError;
use ws_registry::RegistryError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Workspace already exists: {0}")]
    AlreadyExists(String),

    #[error("Project '{project}' not found in workspace '{workspace}'")]
    ProjectNotFound { workspace: String, project: String },

    #[error("Profile '{profile}' not found for provisioner '{plugin}'")]
    ProfileNotFound { plugin: String, profile: String },

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Provisioner '{plugin}' is not available: {source}")]
    ProvisionerUnavailable {
        plugin: String,
        #[source]
        source: RegistryError,
    },

    #[error("{operation} failed for '{subject}': {source}")]
    Plugin {
        operation: &'static str,
        subject: String,
        #[source]
        source: ws_rpc::Error,
    },

    #[error("Workspace store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Failed to issue network auth key: {0}")]
    AuthKey(#[source] anyhow::Error),
}

impl OrchestratorError {
    /// Kind of the plugin-side failure, if this error came from a plugin call.
    pub fn plugin_error_kind(&self) -> Option<ws_rpc::ErrorKind> {
        match self {
            OrchestratorError::Plugin { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}
