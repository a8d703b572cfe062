//! Agent-service plugins hook into a project's lifecycle and report on the
//! health of the agent running inside it.

use crate::provisioner::to_value;
use crate::types::{AgentServiceInfo, InitializeAgentServiceRequest, ProjectHookRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;
use ws_rpc::{Connection, Dispatch, Error, HandshakeConfig, Result, ServeError};

pub const AGENT_SERVICE_HANDSHAKE: HandshakeConfig = HandshakeConfig {
    protocol_version: 1,
    magic_cookie_key: "WS_AGENT_SERVICE_PLUGIN",
    magic_cookie_value: "ws_agent_service",
};

#[async_trait]
pub trait AgentService: Send + Sync {
    async fn initialize(&self, request: InitializeAgentServiceRequest) -> Result<()>;
    async fn get_info(&self) -> Result<AgentServiceInfo>;

    async fn project_pre_init(&self, request: ProjectHookRequest) -> Result<()>;
    async fn project_post_init(&self, request: ProjectHookRequest) -> Result<()>;
    async fn project_pre_start(&self, request: ProjectHookRequest) -> Result<()>;
    async fn project_post_start(&self, request: ProjectHookRequest) -> Result<()>;
    async fn project_pre_stop(&self, request: ProjectHookRequest) -> Result<()>;

    /// How long, in seconds, a liveness probe may take before the plugin is
    /// considered hung.
    async fn liveness_probe_timeout(&self) -> Result<u64>;
    async fn liveness_probe(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum AgentServiceRequest {
    Initialize(InitializeAgentServiceRequest),
    GetInfo,
    ProjectPreInit(ProjectHookRequest),
    ProjectPostInit(ProjectHookRequest),
    ProjectPreStart(ProjectHookRequest),
    ProjectPostStart(ProjectHookRequest),
    ProjectPreStop(ProjectHookRequest),
    LivenessProbeTimeout,
    LivenessProbe,
}

impl AgentServiceRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::GetInfo => "get_info",
            Self::ProjectPreInit(_) => "project_pre_init",
            Self::ProjectPostInit(_) => "project_post_init",
            Self::ProjectPreStart(_) => "project_pre_start",
            Self::ProjectPostStart(_) => "project_post_start",
            Self::ProjectPreStop(_) => "project_pre_stop",
            Self::LivenessProbeTimeout => "liveness_probe_timeout",
            Self::LivenessProbe => "liveness_probe",
        }
    }
}

/// Bound on asking a plugin for its probe timeout.
pub const PROBE_TIMEOUT_QUERY_LIMIT: Duration = Duration::from_secs(5);

pub struct AgentServiceClient {
    connection: Connection,
    probe_timeout: OnceCell<Duration>,
}

impl AgentServiceClient {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            probe_timeout: OnceCell::new(),
        }
    }

    /// The plugin-declared probe deadline, asked for once and then cached.
    pub async fn probe_deadline(&self) -> Result<Duration> {
        self.probe_timeout
            .get_or_try_init(|| async {
                let secs = self.liveness_probe_timeout().await?;
                Ok::<_, Error>(Duration::from_secs(secs.max(1)))
            })
            .await
            .copied()
    }
}

#[async_trait]
impl AgentService for AgentServiceClient {
    async fn initialize(&self, request: InitializeAgentServiceRequest) -> Result<()> {
        self.connection
            .call(&AgentServiceRequest::Initialize(request))
            .await
    }

    async fn get_info(&self) -> Result<AgentServiceInfo> {
        self.connection.call(&AgentServiceRequest::GetInfo).await
    }

    async fn project_pre_init(&self, request: ProjectHookRequest) -> Result<()> {
        self.connection
            .call(&AgentServiceRequest::ProjectPreInit(request))
            .await
    }

    async fn project_post_init(&self, request: ProjectHookRequest) -> Result<()> {
        self.connection
            .call(&AgentServiceRequest::ProjectPostInit(request))
            .await
    }

    async fn project_pre_start(&self, request: ProjectHookRequest) -> Result<()> {
        self.connection
            .call(&AgentServiceRequest::ProjectPreStart(request))
            .await
    }

    async fn project_post_start(&self, request: ProjectHookRequest) -> Result<()> {
        self.connection
            .call(&AgentServiceRequest::ProjectPostStart(request))
            .await
    }

    async fn project_pre_stop(&self, request: ProjectHookRequest) -> Result<()> {
        self.connection
            .call(&AgentServiceRequest::ProjectPreStop(request))
            .await
    }

    async fn liveness_probe_timeout(&self) -> Result<u64> {
        self.connection
            .call_with_timeout(
                &AgentServiceRequest::LivenessProbeTimeout,
                PROBE_TIMEOUT_QUERY_LIMIT,
            )
            .await
    }

    /// Bounded by the plugin's own declared timeout.
    async fn liveness_probe(&self) -> Result<()> {
        let deadline = self.probe_deadline().await?;
        self.connection
            .call_with_timeout(&AgentServiceRequest::LivenessProbe, deadline)
            .await
    }
}

pub struct AgentServiceServer<A> {
    service: A,
    initialized: AtomicBool,
}

impl<A: AgentService> AgentServiceServer<A> {
    pub fn new(service: A) -> Self {
        Self {
            service,
            initialized: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<A: AgentService + 'static> Dispatch for AgentServiceServer<A> {
    type Request = AgentServiceRequest;

    async fn dispatch(&self, request: AgentServiceRequest) -> Result<serde_json::Value> {
        debug!(method = request.method(), "Dispatching agent-service request");

        if let AgentServiceRequest::Initialize(args) = request {
            self.service.initialize(args).await?;
            self.initialized.store(true, Ordering::SeqCst);
            return to_value(());
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::application(format!(
                "{} called before initialize",
                request.method()
            )));
        }

        let s = &self.service;
        match request {
            AgentServiceRequest::Initialize(_) => to_value(()),
            AgentServiceRequest::GetInfo => to_value(s.get_info().await?),
            AgentServiceRequest::ProjectPreInit(r) => to_value(s.project_pre_init(r).await?),
            AgentServiceRequest::ProjectPostInit(r) => to_value(s.project_post_init(r).await?),
            AgentServiceRequest::ProjectPreStart(r) => to_value(s.project_pre_start(r).await?),
            AgentServiceRequest::ProjectPostStart(r) => to_value(s.project_post_start(r).await?),
            AgentServiceRequest::ProjectPreStop(r) => to_value(s.project_pre_stop(r).await?),
            AgentServiceRequest::LivenessProbeTimeout => to_value(s.liveness_probe_timeout().await?),
            AgentServiceRequest::LivenessProbe => to_value(s.liveness_probe().await?),
        }
    }
}

/// Entry point for an agent-service plugin binary.
pub async fn serve_agent_service<A: AgentService + 'static>(
    service: A,
) -> std::result::Result<(), ServeError> {
    ws_rpc::serve(&AGENT_SERVICE_HANDSHAKE, AgentServiceServer::new(service)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{AgentServiceCall, MockAgentService};
    use ws_core::{Project, Repository};
    use ws_rpc::ErrorKind;

    async fn pair() -> (AgentServiceClient, MockAgentService) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mock = MockAgentService::new("mesh-agent");
        let adapter = AgentServiceServer::new(mock.clone());
        tokio::spawn(async move { ws_rpc::serve_connection(server, &adapter).await });
        let client = AgentServiceClient::new(Connection::from_stream(client));
        client
            .initialize(InitializeAgentServiceRequest {
                base_path: "/tmp/agent".to_string(),
                server_url: "http://localhost:3986".to_string(),
                server_version: "0.9.0".to_string(),
            })
            .await
            .unwrap();
        (client, mock)
    }

    fn hook() -> ProjectHookRequest {
        ProjectHookRequest {
            workspace_name: "alpha".to_string(),
            project: Project {
                name: "api".to_string(),
                workspace_id: "alpha".to_string(),
                repository: Repository::new("https://example.com/org/api.git"),
                auth_key: "key".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_hooks_reach_the_service() {
        let (client, mock) = pair().await;
        client.project_pre_init(hook()).await.unwrap();
        client.project_post_start(hook()).await.unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                AgentServiceCall::Initialize,
                AgentServiceCall::ProjectPreInit("api".to_string()),
                AgentServiceCall::ProjectPostStart("api".to_string()),
            ]
        );
        assert_eq!(
            mock.initialized_with().map(|r| r.server_version),
            Some("0.9.0".to_string())
        );
    }

    #[tokio::test]
    async fn test_probe_deadline_is_asked_once() {
        let (client, mock) = pair().await;
        client.liveness_probe().await.unwrap();
        client.liveness_probe().await.unwrap();

        let asked = mock
            .calls()
            .iter()
            .filter(|c| **c == AgentServiceCall::LivenessProbeTimeout)
            .count();
        assert_eq!(asked, 1);
        assert_eq!(client.probe_deadline().await.unwrap(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_hung_probe_times_out() {
        let (client, mock) = pair().await;
        mock.set_probe_timeout_secs(1);
        mock.set_probe_delay(Duration::from_secs(3));

        let err = client.liveness_probe().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_probe_against_silent_plugin_times_out() {
        let (stream, _silent) = tokio::io::duplex(64 * 1024);
        let client = AgentServiceClient::new(Connection::from_stream(stream));

        let err = tokio::time::timeout(
            PROBE_TIMEOUT_QUERY_LIMIT + Duration::from_secs(3),
            client.liveness_probe(),
        )
        .await
        .expect("liveness probe never returned")
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // A failed lookup is not cached as the deadline.
        assert!(client.probe_deadline().await.is_err());
    }
}
