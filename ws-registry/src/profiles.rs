//! Provisioner profiles. Registering a provisioner for the first time seeds
//! the store with the presets the plugin ships.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use ws_core::Profile;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no profile has this name.
    async fn find(&self, name: &str) -> anyhow::Result<Option<Profile>>;
    async fn list(&self) -> anyhow::Result<Vec<Profile>>;
    /// Insert or replace.
    async fn save(&self, profile: &Profile) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<BTreeMap<String, Profile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find(&self, name: &str) -> anyhow::Result<Option<Profile>> {
        Ok(self.profiles.read().await.get(name).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<Profile>> {
        Ok(self.profiles.read().await.values().cloned().collect())
    }

    async fn save(&self, profile: &Profile) -> anyhow::Result<()> {
        self.profiles
            .write()
            .await
            .insert(profile.name.clone(), profile.clone());
        Ok(())
    }
}
