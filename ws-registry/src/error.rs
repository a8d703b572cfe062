use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use ws_rpc::HandshakeError;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("'{}' is not a usable plugin binary path", .0.display())]
    InvalidPath(PathBuf),

    #[error("{kind} plugin '{name}' is already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("{kind} plugin '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("failed to start plugin '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("plugin '{name}' exited before completing the handshake ({status})")]
    ExitedBeforeHandshake { name: String, status: String },

    #[error("plugin '{name}' did not complete the handshake within {}s", .timeout.as_secs())]
    HandshakeTimeout { name: String, timeout: Duration },

    #[error("plugin '{name}' failed the handshake: {source}")]
    Handshake {
        name: String,
        #[source]
        source: HandshakeError,
    },

    #[error("failed to connect to plugin '{name}': {source}")]
    Connect {
        name: String,
        #[source]
        source: ws_rpc::Error,
    },

    #[error("failed to initialize plugin '{name}': {source}")]
    Initialize {
        name: String,
        #[source]
        source: ws_rpc::Error,
    },

    #[error("first-run setup of plugin '{name}' failed: {source}")]
    Setup {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("registration of plugin '{name}' was cancelled by shutdown")]
    Cancelled { name: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
