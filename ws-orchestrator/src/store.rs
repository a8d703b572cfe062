use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use ws_core::Workspace;

/// Persisted workspace records, keyed by workspace id.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// `Ok(None)` when no record has this id.
    async fn find(&self, id: &str) -> anyhow::Result<Option<Workspace>>;
    async fn list(&self) -> anyhow::Result<Vec<Workspace>>;
    /// Insert or replace.
    async fn save(&self, workspace: &Workspace) -> anyhow::Result<()>;
    async fn delete(&self, workspace: &Workspace) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryWorkspaceStore {
    workspaces: RwLock<BTreeMap<String, Workspace>>,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn find(&self, id: &str) -> anyhow::Result<Option<Workspace>> {
        Ok(self.workspaces.read().await.get(id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<Workspace>> {
        Ok(self.workspaces.read().await.values().cloned().collect())
    }

    async fn save(&self, workspace: &Workspace) -> anyhow::Result<()> {
        self.workspaces
            .write()
            .await
            .insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    async fn delete(&self, workspace: &Workspace) -> anyhow::Result<()> {
        match self.workspaces.write().await.remove(&workspace.id) {
            Some(_) => Ok(()),
            None => anyhow::bail!("workspace {} is not stored", workspace.id),
        }
    }
}
