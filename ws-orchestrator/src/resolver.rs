use std::collections::HashMap;
use std::sync::Arc;
use ws_provider::Provisioner;
use ws_registry::{ProvisionerRegistry, RegistryError};

/// Looks up the running provisioner bound to a workspace.
pub trait ProvisionerResolver: Send + Sync {
    fn resolve(&self, plugin_name: &str) -> Result<Arc<dyn Provisioner>, RegistryError>;
}

impl ProvisionerResolver for ProvisionerRegistry {
    fn resolve(&self, plugin_name: &str) -> Result<Arc<dyn Provisioner>, RegistryError> {
        let handle = self.get(plugin_name)?;
        let client: Arc<dyn Provisioner> = handle.client().clone();
        Ok(client)
    }
}

/// Fixed set of in-process provisioners.
impl ProvisionerResolver for HashMap<String, Arc<dyn Provisioner>> {
    fn resolve(&self, plugin_name: &str) -> Result<Arc<dyn Provisioner>, RegistryError> {
        self.get(plugin_name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind: "provisioner",
                name: plugin_name.to_string(),
            })
    }
}
