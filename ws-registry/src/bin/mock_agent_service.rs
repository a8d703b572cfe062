//! Scripted agent-service plugin used by the registry integration tests.

#[tokio::main]
async fn main() {
    std::process::exit(ws_registry::scripted::run_agent_service().await);
}
