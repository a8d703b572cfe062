//! Plugin capability interfaces.
//!
//! Each plugin kind has a trait, a tagged request enum naming its
//! operations, a client that forwards trait calls over a [`ws_rpc::Connection`]
//! and a server adapter that plugin binaries hand to [`ws_rpc::serve`].

pub mod agent_service;
pub mod provisioner;
pub mod types;

// When the `test-helpers` feature is enabled, include the recording mocks.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use agent_service::{
    serve_agent_service, AgentService, AgentServiceClient, AgentServiceRequest,
    AgentServiceServer, AGENT_SERVICE_HANDSHAKE, PROBE_TIMEOUT_QUERY_LIMIT,
};
pub use provisioner::{
    serve_provisioner, Provisioner, ProvisionerClient, ProvisionerRequest, ProvisionerServer,
    PROVISIONER_HANDSHAKE,
};
pub use types::{
    AgentServiceInfo, InitializeAgentServiceRequest, InitializeProviderRequest, PresetProfile,
    ProjectHookRequest, ProjectInfo, ProjectRequest, ProviderInfo, WorkspaceInfo,
    WorkspaceRequest,
};
