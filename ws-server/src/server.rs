use crate::bootstrap::{install_default_plugins, register_installed};
use crate::config::Config;
use crate::tasks::{start_event_log_task, start_liveness_task};
use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use ws_events::EventBus;
use ws_orchestrator::{InMemoryWorkspaceStore, LocalKeyIssuer, WorkspaceOrchestrator};
use ws_registry::{
    AgentServiceKind, AgentServiceRegistry, InMemoryProfileStore, ProfileStore, ProvisionerKind,
    ProvisionerRegistry,
};

/// Composition root: owns the plugin registries, the event bus and the
/// orchestrator, plus the background tasks that watch them.
pub struct Server {
    config: Config,
    provisioners: Arc<ProvisionerRegistry>,
    agent_services: Arc<AgentServiceRegistry>,
    profiles: Arc<dyn ProfileStore>,
    events: EventBus,
    orchestrator: WorkspaceOrchestrator,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Clean up leftovers from a previous run, install and start plugins
    /// and wire up the orchestrator.
    pub async fn start(config: Config) -> Result<Self> {
        let dirs = config.plugin_dirs();
        let identity = config.identity();
        info!(plugins_dir = %dirs.root().display(), "Starting workspace server");

        let profiles: Arc<dyn ProfileStore> = Arc::new(InMemoryProfileStore::new());
        let provisioner_kind =
            ProvisionerKind::new(identity.clone()).with_profile_store(profiles.clone());
        let provisioners = Arc::new(
            ProvisionerRegistry::new(provisioner_kind, dirs.provisioners())
                .with_start_timeout(config.plugin_start_timeout()),
        );
        let agent_services = Arc::new(
            AgentServiceRegistry::new(AgentServiceKind::new(identity), dirs.agent_services())
                .with_start_timeout(config.plugin_start_timeout()),
        );

        let orphans = provisioners.terminate_orphans() + agent_services.terminate_orphans();
        if orphans > 0 {
            info!(orphans, "Terminated plugin processes left over from a previous run");
        }

        install_default_plugins(&config, &dirs).await;
        register_installed(&provisioners).await;
        register_installed(&agent_services).await;

        let events = EventBus::new(config.bus_config());
        let orchestrator = WorkspaceOrchestrator::new(
            Arc::new(InMemoryWorkspaceStore::new()),
            provisioners.clone(),
            Arc::new(LocalKeyIssuer),
            events.clone(),
        )
        .with_profile_store(profiles.clone())
        .with_plugin_call_timeout(config.plugin_call_timeout());

        let tasks = vec![
            tokio::spawn(start_event_log_task(events.subscribe())),
            tokio::spawn(start_liveness_task(
                agent_services.clone(),
                config.liveness_interval(),
            )),
        ];

        info!(
            provisioners = ?provisioners.names(),
            agent_services = ?agent_services.names(),
            "Workspace server ready"
        );

        Ok(Self {
            config,
            provisioners,
            agent_services,
            profiles,
            events,
            orchestrator,
            tasks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &WorkspaceOrchestrator {
        &self.orchestrator
    }

    pub fn provisioners(&self) -> &Arc<ProvisionerRegistry> {
        &self.provisioners
    }

    pub fn agent_services(&self) -> &Arc<AgentServiceRegistry> {
        &self.agent_services
    }

    /// Provisioner profiles, seeded with each plugin's presets on its first
    /// setup.
    pub fn profiles(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stop background tasks and kill every plugin process.
    pub async fn shutdown(self) {
        info!("Shutting down workspace server");
        for task in &self.tasks {
            task.abort();
        }
        self.provisioners.shutdown().await;
        self.agent_services.shutdown().await;
    }
}
