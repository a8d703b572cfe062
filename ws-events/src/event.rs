use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    Creating,
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Removing,
    Removed,
    ProjectCreating,
    ProjectCreated,
    ProjectStarting,
    ProjectStarted,
    ProjectStopping,
    ProjectStopped,
    ProjectRemoving,
    ProjectRemoved,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Creating => "creating",
            EventName::Created => "created",
            EventName::Starting => "starting",
            EventName::Started => "started",
            EventName::Stopping => "stopping",
            EventName::Stopped => "stopped",
            EventName::Removing => "removing",
            EventName::Removed => "removed",
            EventName::ProjectCreating => "project_creating",
            EventName::ProjectCreated => "project_created",
            EventName::ProjectStarting => "project_starting",
            EventName::ProjectStarted => "project_started",
            EventName::ProjectStopping => "project_stopping",
            EventName::ProjectStopped => "project_stopped",
            EventName::ProjectRemoving => "project_removing",
            EventName::ProjectRemoved => "project_removed",
        }
    }

    pub fn is_project_event(&self) -> bool {
        self.as_str().starts_with("project_")
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub workspace_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

/// A lifecycle event. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: EventName,
    pub payload: EventPayload,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn workspace(name: EventName, workspace_name: impl Into<String>) -> Self {
        Self {
            name,
            payload: EventPayload {
                workspace_name: workspace_name.into(),
                project_name: None,
            },
            at: Utc::now(),
        }
    }

    pub fn project(
        name: EventName,
        workspace_name: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            name,
            payload: EventPayload {
                workspace_name: workspace_name.into(),
                project_name: Some(project_name.into()),
            },
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_events_are_recognised() {
        assert!(EventName::ProjectRemoved.is_project_event());
        assert!(!EventName::Removed.is_project_event());
    }

    #[test]
    fn test_serializes_name_and_skips_missing_project() {
        let event = Event::workspace(EventName::Created, "alpha");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["name"], "created");
        assert_eq!(value["payload"]["workspaceName"], "alpha");
        assert!(value["payload"].get("projectName").is_none());

        let event = Event::project(EventName::ProjectStarting, "alpha", "api");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["name"], "project_starting");
        assert_eq!(value["payload"]["projectName"], "api");
        assert_eq!(
            serde_json::to_value(EventName::ProjectStarting).unwrap(),
            EventName::ProjectStarting.as_str()
        );
    }
}
