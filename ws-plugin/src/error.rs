use std::path::PathBuf;
use thiserror::Error;
use ws_platform::{OperatingSystem, UnsupportedPlatform};

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("invalid plugin registry url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to fetch {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode plugin manifest: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid plugin manifest: {0}")]
    InvalidManifest(String),

    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),

    #[error("no download available for {os}")]
    NoDownloadForPlatform { os: OperatingSystem },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PluginError>;
