use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use ws_logging::{init_subscriber, LogConfig};
use ws_server::{Config, Server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "WS_SERVER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held for the life of the process so buffered file logs are flushed.
    let _log_guard = init_subscriber(&LogConfig::from_env())?;

    let config = Config::load(args.config.as_deref())?;
    info!(
        "Configuration loaded: plugins_dir={}, registry_url={}",
        config.plugins_dir.display(),
        config.registry_url.as_deref().unwrap_or("<none>")
    );

    let server = Server::start(config).await?;

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
