//! Validation of user-supplied identifiers.
//!
//! Workspace and project names end up in container names, hostnames and
//! filesystem paths on the plugin side, so they are held to a conservative
//! character set before anything is persisted or sent to a plugin.

use thiserror::Error;

/// Maximum length of a workspace or project name (one DNS label).
pub const MAX_NAME_LEN: usize = 63;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} name cannot be empty")]
    Empty { kind: &'static str },

    #[error("{kind} name '{name}' is longer than {max} characters", max = MAX_NAME_LEN)]
    TooLong { kind: &'static str, name: String },

    #[error("{kind} name '{name}' contains invalid characters (only alphanumeric, '-' and '_' allowed)")]
    InvalidCharacters { kind: &'static str, name: String },

    #[error("{kind} name '{name}' cannot start with '-' or '_'")]
    InvalidStart { kind: &'static str, name: String },

    #[error("duplicate project name '{0}'")]
    DuplicateProject(String),
}

/// Validate a workspace name. Workspace ids equal their names.
pub fn validate_workspace_name(name: &str) -> Result<(), ValidationError> {
    validate_name("workspace", name)
}

pub fn validate_project_name(name: &str) -> Result<(), ValidationError> {
    validate_name("project", name)
}

fn validate_name(kind: &'static str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty { kind });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            kind,
            name: name.to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidCharacters {
            kind,
            name: name.to_string(),
        });
    }

    if name.starts_with('-') || name.starts_with('_') {
        return Err(ValidationError::InvalidStart {
            kind,
            name: name.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_workspace_name("workspace1").is_ok());
        assert!(validate_workspace_name("my-workspace_2").is_ok());
        assert!(validate_project_name("API").is_ok());
        assert!(validate_workspace_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert_eq!(
            validate_workspace_name(""),
            Err(ValidationError::Empty { kind: "workspace" })
        );
        assert!(matches!(
            validate_workspace_name("invalid name"),
            Err(ValidationError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_project_name("../escape"),
            Err(ValidationError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_project_name("-leading"),
            Err(ValidationError::InvalidStart { .. })
        ));
        assert!(matches!(
            validate_workspace_name(&"a".repeat(MAX_NAME_LEN + 1)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_injection_attempts_rejected() {
        assert!(validate_workspace_name("ws; rm -rf /").is_err());
        assert!(validate_workspace_name("ws\nmalicious").is_err());
    }
}
