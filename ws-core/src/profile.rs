use serde::{Deserialize, Serialize};

/// The provisioner plugin a profile configures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileProvisioner {
    pub name: String,
    pub version: String,
}

/// Named set of provisioner options that workspaces select through
/// [`WorkspaceProvisioner::profile_name`](crate::WorkspaceProvisioner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub provisioner: ProfileProvisioner,
    /// Opaque to the server; interpreted by the provisioner.
    #[serde(default)]
    pub options: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_wire_shape() {
        let profile: Profile = serde_json::from_value(json!({
            "name": "local",
            "provisioner": {"name": "docker-provider", "version": "v0.1.0"}
        }))
        .unwrap();

        assert_eq!(profile.provisioner.name, "docker-provider");
        assert!(profile.options.is_null());
    }
}
