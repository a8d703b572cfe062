use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that cross the plugin process boundary.
///
/// Serialized as `{"kind": "...", "message": "..."}` so the kind survives the
/// trip and callers can branch on it instead of matching message text.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Application(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Transport,
    Application,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transport => "transport",
            ErrorKind::Application => "application",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport(message.into())
    }

    pub fn application(message: impl Into<String>) -> Self {
        Error::Application(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Application(_) => ErrorKind::Application,
            Error::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::NotFound(m) | Error::Transport(m) | Error::Application(m) | Error::Timeout(m) => {
                m
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Transport(format!("invalid frame: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
