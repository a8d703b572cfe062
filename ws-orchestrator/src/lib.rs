//! Workspace orchestration business logic
//!
//! [`WorkspaceOrchestrator`] drives a workspace's provisioner plugin through
//! create, start, stop and destroy, and publishes lifecycle events on the
//! [`ws_events::EventBus`] as it goes. Persistence and mesh-network keys are
//! collaborators behind the [`WorkspaceStore`] and [`NetworkKeyIssuer`]
//! traits.

pub mod error;
pub mod network;
pub mod orchestrator;
pub mod resolver;
pub mod store;

pub use error::{OrchestratorError, Result};
pub use network::{LocalKeyIssuer, NetworkKeyIssuer};
pub use orchestrator::{
    CreateProjectRequest, CreateWorkspaceRequest, WorkspaceDetails, WorkspaceOrchestrator,
};
pub use resolver::ProvisionerResolver;
pub use store::{InMemoryWorkspaceStore, WorkspaceStore};
