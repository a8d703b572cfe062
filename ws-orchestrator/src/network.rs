use async_trait::async_trait;
use uuid::Uuid;

/// Issues the mesh-network key a project's agent uses to join the network.
#[async_trait]
pub trait NetworkKeyIssuer: Send + Sync {
    async fn create_auth_key(&self) -> anyhow::Result<String>;
}

/// Issues random keys without talking to a coordination server.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalKeyIssuer;

#[async_trait]
impl NetworkKeyIssuer for LocalKeyIssuer {
    async fn create_auth_key(&self) -> anyhow::Result<String> {
        Ok(format!("wskey-{}", Uuid::new_v4().simple()))
    }
}
