use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use ws_core::{Profile, ProfileProvisioner, Repository, Workspace, WorkspaceProvisioner};
use ws_events::{EventBus, EventName, Subscription};
use ws_orchestrator::{
    CreateProjectRequest, CreateWorkspaceRequest, InMemoryWorkspaceStore, LocalKeyIssuer,
    OrchestratorError, WorkspaceOrchestrator, WorkspaceStore,
};
use ws_provider::mock::{MockProvisioner, ProvisionerCall};
use ws_provider::Provisioner;
use ws_registry::{InMemoryProfileStore, ProfileStore};
use ws_rpc::ErrorKind;

const PLUGIN: &str = "docker-provider";

struct Fixture {
    orchestrator: WorkspaceOrchestrator,
    provisioner: MockProvisioner,
    store: Arc<InMemoryWorkspaceStore>,
    events: Subscription,
}

fn fixture() -> Fixture {
    let provisioner = MockProvisioner::new(PLUGIN);
    let mut plugins: HashMap<String, Arc<dyn Provisioner>> = HashMap::new();
    plugins.insert(PLUGIN.to_string(), Arc::new(provisioner.clone()));

    let store = Arc::new(InMemoryWorkspaceStore::new());
    let bus = EventBus::default();
    let events = bus.subscribe();
    let orchestrator = WorkspaceOrchestrator::new(
        store.clone(),
        Arc::new(plugins),
        Arc::new(LocalKeyIssuer),
        bus,
    );

    Fixture {
        orchestrator,
        provisioner,
        store,
        events,
    }
}

fn request(name: &str, projects: &[&str]) -> CreateWorkspaceRequest {
    CreateWorkspaceRequest {
        name: name.to_string(),
        projects: projects
            .iter()
            .map(|p| CreateProjectRequest {
                name: p.to_string(),
                repository: Repository::new(format!("https://example.com/org/{p}.git")),
            })
            .collect(),
        provisioner: WorkspaceProvisioner::new(PLUGIN, "default"),
    }
}

fn drain(events: &mut Subscription) -> Vec<(EventName, Option<String>)> {
    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        seen.push((event.name, event.payload.project_name));
    }
    seen
}

fn project(name: &str) -> Option<String> {
    Some(name.to_string())
}

async fn created(fx: &Fixture, name: &str, projects: &[&str]) -> Workspace {
    let workspace = fx
        .orchestrator
        .build_workspace(request(name, projects))
        .await
        .unwrap();
    fx.orchestrator.create_workspace(&workspace).await.unwrap();
    workspace
}

#[tokio::test]
async fn test_build_workspace_assigns_keys_and_ids() {
    let fx = fixture();
    let workspace = fx
        .orchestrator
        .build_workspace(request("alpha", &["api", "web"]))
        .await
        .unwrap();

    assert_eq!(workspace.id, "alpha");
    assert_eq!(workspace.project_names(), vec!["api", "web"]);
    assert!(workspace.projects.iter().all(|p| p.workspace_id == "alpha"));
    assert_ne!(workspace.projects[0].auth_key, workspace.projects[1].auth_key);
    assert!(fx.store.find("alpha").await.unwrap().is_none());
}

#[tokio::test]
async fn test_build_workspace_rejects_bad_names() {
    let fx = fixture();

    let err = fx
        .orchestrator
        .build_workspace(request("bad name", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(_)));

    let err = fx
        .orchestrator
        .build_workspace(request("alpha", &["api", "api"]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(_)));
}

#[tokio::test]
async fn test_create_runs_projects_in_order() {
    let mut fx = fixture();
    let workspace = created(&fx, "alpha", &["api", "web"]).await;

    assert_eq!(
        fx.provisioner.calls(),
        vec![
            ProvisionerCall::CreateWorkspace("alpha".to_string()),
            ProvisionerCall::CreateProject("api".to_string()),
            ProvisionerCall::CreateProject("web".to_string()),
        ]
    );
    assert_eq!(
        drain(&mut fx.events),
        vec![
            (EventName::Creating, None),
            (EventName::ProjectCreating, project("api")),
            (EventName::ProjectCreated, project("api")),
            (EventName::ProjectCreating, project("web")),
            (EventName::ProjectCreated, project("web")),
            (EventName::Created, None),
        ]
    );
    assert_eq!(fx.orchestrator.find_workspace("alpha").await.unwrap(), workspace);
}

#[tokio::test]
async fn test_create_stops_at_first_failed_project() {
    let mut fx = fixture();
    fx.provisioner
        .fail_on(ProvisionerCall::CreateProject("p2".to_string()));

    let workspace = fx
        .orchestrator
        .build_workspace(request("alpha", &["p1", "p2", "p3"]))
        .await
        .unwrap();
    let err = fx.orchestrator.create_workspace(&workspace).await.unwrap_err();

    match &err {
        OrchestratorError::Plugin {
            operation, subject, ..
        } => {
            assert_eq!(*operation, "create_project");
            assert_eq!(subject, "p2");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.plugin_error_kind(), Some(ErrorKind::Application));

    let calls = fx.provisioner.calls();
    assert!(!calls.contains(&ProvisionerCall::CreateProject("p3".to_string())));
    assert_eq!(calls.len(), 3);

    let events = drain(&mut fx.events);
    assert!(events.contains(&(EventName::ProjectCreated, project("p1"))));
    assert!(!events.contains(&(EventName::ProjectCreated, project("p2"))));
    assert!(!events.iter().any(|(name, _)| *name == EventName::Created));

    // No rollback: the record stays for the caller to reconcile.
    assert!(fx.store.find("alpha").await.unwrap().is_some());
}

#[tokio::test]
async fn test_create_refuses_existing_workspace() {
    let fx = fixture();
    let workspace = created(&fx, "alpha", &[]).await;

    let err = fx.orchestrator.create_workspace(&workspace).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyExists(id) if id == "alpha"));
    assert_eq!(fx.provisioner.calls().len(), 1);
}

#[tokio::test]
async fn test_unregistered_provisioner_fails_before_saving() {
    let fx = fixture();
    let mut req = request("alpha", &["api"]);
    req.provisioner = WorkspaceProvisioner::new("missing-provider", "default");
    let workspace = fx.orchestrator.build_workspace(req).await.unwrap();

    let err = fx.orchestrator.create_workspace(&workspace).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::ProvisionerUnavailable { ref plugin, .. } if plugin == "missing-provider"
    ));
    assert!(fx.store.find("alpha").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_requires_profile_of_the_same_provisioner() {
    let profiles = Arc::new(InMemoryProfileStore::new());
    profiles
        .save(&Profile {
            name: "default".to_string(),
            provisioner: ProfileProvisioner {
                name: PLUGIN.to_string(),
                version: "v0.1.0".to_string(),
            },
            options: serde_json::Value::Null,
        })
        .await
        .unwrap();
    profiles
        .save(&Profile {
            name: "remote".to_string(),
            provisioner: ProfileProvisioner {
                name: "aws-provider".to_string(),
                version: "v0.1.0".to_string(),
            },
            options: serde_json::Value::Null,
        })
        .await
        .unwrap();
    let mut fx = fixture();
    fx.orchestrator = fx.orchestrator.clone().with_profile_store(profiles);

    for missing in ["remote", "nope"] {
        let mut req = request(&format!("ws-{missing}"), &["api"]);
        req.provisioner = WorkspaceProvisioner::new(PLUGIN, missing);
        let workspace = fx.orchestrator.build_workspace(req).await.unwrap();
        let err = fx.orchestrator.create_workspace(&workspace).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ProfileNotFound { ref profile, .. } if profile == missing
        ));
        assert!(fx.store.find(&workspace.id).await.unwrap().is_none());
    }
    assert!(fx.provisioner.calls().is_empty());
    assert!(drain(&mut fx.events).is_empty());

    created(&fx, "alpha", &["api"]).await;
    assert!(fx.store.find("alpha").await.unwrap().is_some());
}

#[tokio::test]
async fn test_start_calls_workspace_before_projects() {
    let mut fx = fixture();
    let workspace = created(&fx, "alpha", &["api", "web"]).await;
    drain(&mut fx.events);
    let before = fx.provisioner.calls().len();

    fx.orchestrator.start_workspace(&workspace).await.unwrap();

    assert_eq!(
        fx.provisioner.calls()[before..],
        [
            ProvisionerCall::StartWorkspace("alpha".to_string()),
            ProvisionerCall::StartProject("api".to_string()),
            ProvisionerCall::StartProject("web".to_string()),
        ]
    );
    assert_eq!(
        drain(&mut fx.events),
        vec![
            (EventName::Starting, None),
            (EventName::ProjectStarting, project("api")),
            (EventName::ProjectStarted, project("api")),
            (EventName::ProjectStarting, project("web")),
            (EventName::ProjectStarted, project("web")),
            (EventName::Started, None),
        ]
    );
}

#[tokio::test]
async fn test_failed_workspace_stop_publishes_nothing() {
    let mut fx = fixture();
    let workspace = created(&fx, "alpha", &["api"]).await;
    drain(&mut fx.events);
    fx.provisioner
        .fail_on(ProvisionerCall::StopWorkspace("alpha".to_string()));

    let err = fx.orchestrator.stop_workspace(&workspace).await.unwrap_err();
    assert_eq!(err.plugin_error_kind(), Some(ErrorKind::Application));
    assert!(drain(&mut fx.events).is_empty());
    assert!(!fx
        .provisioner
        .calls()
        .contains(&ProvisionerCall::StopProject("api".to_string())));
}

#[tokio::test]
async fn test_single_project_operations_skip_workspace_events() {
    let mut fx = fixture();
    created(&fx, "alpha", &["api", "web"]).await;
    drain(&mut fx.events);

    fx.orchestrator.stop_project("alpha", "web").await.unwrap();
    fx.orchestrator.start_project("alpha", "web").await.unwrap();

    let calls = fx.provisioner.calls();
    assert_eq!(
        calls[calls.len() - 2..],
        [
            ProvisionerCall::StopProject("web".to_string()),
            ProvisionerCall::StartProject("web".to_string()),
        ]
    );
    let events = drain(&mut fx.events);
    assert!(events.iter().all(|(name, _)| name.is_project_event()));
    assert_eq!(events.len(), 4);
}

#[tokio::test]
async fn test_single_project_operations_need_stored_workspace() {
    let fx = fixture();
    created(&fx, "alpha", &["api"]).await;

    let err = fx.orchestrator.start_project("beta", "api").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(id) if id == "beta"));

    let err = fx.orchestrator.stop_project("alpha", "web").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ProjectNotFound { .. }));
}

#[tokio::test]
async fn test_destroy_removes_projects_before_workspace() {
    for projects in [&[][..], &["only"][..], &["a", "b", "c"][..]] {
        let mut fx = fixture();
        let workspace = created(&fx, "alpha", projects).await;
        drain(&mut fx.events);
        let before = fx.provisioner.calls().len();

        fx.orchestrator.destroy_workspace(&workspace).await.unwrap();

        let mut expected: Vec<ProvisionerCall> = projects
            .iter()
            .map(|p| ProvisionerCall::DestroyProject(p.to_string()))
            .collect();
        expected.push(ProvisionerCall::DestroyWorkspace("alpha".to_string()));
        assert_eq!(fx.provisioner.calls()[before..], expected[..]);

        let events = drain(&mut fx.events);
        assert_eq!(events.first(), Some(&(EventName::Removing, None)));
        assert_eq!(events.last(), Some(&(EventName::Removed, None)));
        assert_eq!(events.len(), 2 + 2 * projects.len());
        assert!(fx.store.find("alpha").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_failed_destroy_keeps_record() {
    let mut fx = fixture();
    let workspace = created(&fx, "alpha", &["api", "web"]).await;
    drain(&mut fx.events);
    fx.provisioner
        .fail_on(ProvisionerCall::DestroyProject("api".to_string()));

    fx.orchestrator
        .destroy_workspace(&workspace)
        .await
        .unwrap_err();

    assert!(!fx
        .provisioner
        .calls()
        .contains(&ProvisionerCall::DestroyWorkspace("alpha".to_string())));
    assert!(!drain(&mut fx.events)
        .iter()
        .any(|(name, _)| *name == EventName::Removed));
    assert!(fx.store.find("alpha").await.unwrap().is_some());
}

#[tokio::test]
async fn test_removed_is_published_only_after_record_is_deleted() {
    let mut fx = fixture();
    let workspace = created(&fx, "alpha", &["api"]).await;
    drain(&mut fx.events);
    // The record vanishes underneath the destroy, so the final delete fails.
    fx.store.delete(&workspace).await.unwrap();

    let err = fx
        .orchestrator
        .destroy_workspace(&workspace)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Store(_)), "unexpected error: {err}");
    assert_eq!(
        fx.provisioner.calls().last(),
        Some(&ProvisionerCall::DestroyWorkspace("alpha".to_string()))
    );
    let events = drain(&mut fx.events);
    assert!(!events.iter().any(|(name, _)| *name == EventName::Removed));
    assert_eq!(events.last(), Some(&(EventName::ProjectRemoved, project("api"))));
}

#[tokio::test]
async fn test_force_destroy_ignores_plugin_failures() {
    let mut fx = fixture();
    let workspace = created(&fx, "alpha", &["api", "web"]).await;
    drain(&mut fx.events);
    fx.provisioner
        .fail_on(ProvisionerCall::DestroyProject("api".to_string()));

    fx.orchestrator
        .force_destroy_workspace(&workspace)
        .await
        .unwrap();

    let calls = fx.provisioner.calls();
    assert!(calls.contains(&ProvisionerCall::DestroyProject("web".to_string())));
    assert_eq!(
        calls.last(),
        Some(&ProvisionerCall::DestroyWorkspace("alpha".to_string()))
    );
    assert_eq!(drain(&mut fx.events).last(), Some(&(EventName::Removed, None)));
    assert!(fx.orchestrator.list_workspaces().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_workspace_info_covers_every_project() {
    let fx = fixture();
    let workspace = created(&fx, "alpha", &["api", "web"]).await;

    let details = fx.orchestrator.get_workspace_info(&workspace).await.unwrap();
    assert_eq!(details.info.name, "alpha");
    assert_eq!(
        details.info.provider_metadata.as_deref(),
        Some("docker-provider-metadata")
    );
    let names: Vec<&str> = details.info.projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["api", "web"]);
}

#[tokio::test]
async fn test_plugin_call_timeout() {
    let fx = fixture();
    let orchestrator = fx
        .orchestrator
        .clone()
        .with_plugin_call_timeout(Some(Duration::from_millis(20)));
    let workspace = orchestrator
        .build_workspace(request("alpha", &[]))
        .await
        .unwrap();
    fx.provisioner.set_delay(Duration::from_millis(500));

    let err = orchestrator.create_workspace(&workspace).await.unwrap_err();
    assert_eq!(err.plugin_error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn test_operations_on_different_workspaces_run_concurrently() {
    let fx = fixture();
    let a = created(&fx, "alpha", &["api"]).await;
    let b = created(&fx, "beta", &["api"]).await;
    fx.provisioner.set_delay(Duration::from_millis(100));

    let started = tokio::time::Instant::now();
    let (first, second) = tokio::join!(
        fx.orchestrator.start_workspace(&a),
        fx.orchestrator.start_workspace(&b)
    );
    first.unwrap();
    second.unwrap();
    assert!(started.elapsed() < Duration::from_millis(380));
}
