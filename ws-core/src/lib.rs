//! Shared data model for the workspace server.
//!
//! Workspaces, their projects and the provisioner binding that names which
//! plugin (and which of its configuration profiles) provisions them. Every
//! other crate in the workspace speaks in these types.

pub mod profile;
pub mod validation;
pub mod workspace;

pub use profile::{Profile, ProfileProvisioner};
pub use validation::{validate_project_name, validate_workspace_name, ValidationError};
pub use workspace::{Project, Repository, Workspace, WorkspaceProvisioner};
