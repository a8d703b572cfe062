use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, info, warn};
use ws_events::Subscription;
use ws_provider::{AgentService, AgentServiceClient};
use ws_registry::AgentServiceRegistry;

/// Stream lifecycle events into the log until the subscription ends.
pub async fn start_event_log_task(mut events: Subscription) {
    while let Some(event) = events.recv().await {
        match event.payload.project_name.as_deref() {
            Some(project) => info!(
                event = %event.name,
                workspace = %event.payload.workspace_name,
                project,
                "Project lifecycle event"
            ),
            None => info!(
                event = %event.name,
                workspace = %event.payload.workspace_name,
                "Workspace lifecycle event"
            ),
        }
    }
    debug!("Event log stream closed");
}

/// Probe every registered agent service on a fixed interval.
pub async fn start_liveness_task(registry: Arc<AgentServiceRegistry>, every: Duration) {
    let mut ticker = interval(every);
    info!(interval_secs = every.as_secs(), "Agent service liveness checks running");

    loop {
        ticker.tick().await;
        let clients = registry
            .list()
            .into_iter()
            .map(|handle| (handle.name().to_string(), handle.client().clone()))
            .collect();

        for (plugin, result) in probe_agent_services(clients).await {
            match result {
                Ok(()) => debug!(plugin = %plugin, "Agent service is alive"),
                Err(e) => warn!(
                    plugin = %plugin,
                    kind = %e.kind(),
                    error = %e,
                    "Agent service liveness probe failed"
                ),
            }
        }
    }
}

/// Probe each agent service on its own task so one hung plugin cannot hold
/// up the others. Results are sorted by plugin name.
pub async fn probe_agent_services(
    clients: Vec<(String, Arc<AgentServiceClient>)>,
) -> Vec<(String, ws_rpc::Result<()>)> {
    let mut probes = JoinSet::new();
    for (name, client) in clients {
        probes.spawn(async move {
            let result = client.liveness_probe().await;
            (name, result)
        });
    }

    let mut results = Vec::with_capacity(probes.len());
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "Liveness probe task failed"),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}
