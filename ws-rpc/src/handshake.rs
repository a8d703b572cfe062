//! The startup contract between the server and a plugin child process.
//!
//! A plugin prints exactly one line on stdout once it is listening:
//!
//! ```text
//! CORE_PROTOCOL_VERSION|APP_PROTOCOL_VERSION|NETWORK|ADDRESS|PROTOCOL|COOKIE
//! ```
//!
//! The parent validates every field against the [`HandshakeConfig`] of the
//! plugin kind it expects before trusting the child.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version of the line format and framing itself.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// The only application protocol spoken over the announced address.
pub const PROTOCOL_NAME: &str = "jsonrpc";

const FIELD_COUNT: usize = 6;

/// Per-kind handshake contract shared by the server and the plugin binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub magic_cookie_key: &'static str,
    pub magic_cookie_value: &'static str,
}

impl HandshakeConfig {
    /// Whether the current process was launched with this contract's cookie.
    pub fn cookie_present(&self) -> bool {
        std::env::var(self.magic_cookie_key)
            .map(|value| value == self.magic_cookie_value)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Unix,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Unix => "unix",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(HandshakeError::Malformed(format!(
                "unknown network '{other}'"
            ))),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("malformed handshake line: {0}")]
    Malformed(String),

    #[error("unsupported core protocol version {actual} (expected {expected})")]
    CoreVersionMismatch { expected: u32, actual: u32 },

    #[error("plugin speaks protocol version {actual}, server expects {expected}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    #[error("magic cookie mismatch: plugin is not of the expected kind")]
    CookieMismatch,
}

/// One parsed handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    pub core_version: u32,
    pub protocol_version: u32,
    pub network: Network,
    pub address: String,
    pub protocol: String,
    pub cookie: String,
}

impl HandshakeLine {
    /// The line a plugin announces for `config` once listening on `address`.
    pub fn announce(config: &HandshakeConfig, network: Network, address: impl Into<String>) -> Self {
        Self {
            core_version: CORE_PROTOCOL_VERSION,
            protocol_version: config.protocol_version,
            network,
            address: address.into(),
            protocol: PROTOCOL_NAME.to_string(),
            cookie: config.magic_cookie_value.to_string(),
        }
    }

    /// Check the line against what the parent expects from this plugin kind.
    pub fn validate(&self, config: &HandshakeConfig) -> Result<(), HandshakeError> {
        if self.core_version != CORE_PROTOCOL_VERSION {
            return Err(HandshakeError::CoreVersionMismatch {
                expected: CORE_PROTOCOL_VERSION,
                actual: self.core_version,
            });
        }
        if self.protocol_version != config.protocol_version {
            return Err(HandshakeError::ProtocolVersionMismatch {
                expected: config.protocol_version,
                actual: self.protocol_version,
            });
        }
        if self.cookie != config.magic_cookie_value {
            return Err(HandshakeError::CookieMismatch);
        }
        Ok(())
    }
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.core_version,
            self.protocol_version,
            self.network,
            self.address,
            self.protocol,
            self.cookie
        )
    }
}

impl FromStr for HandshakeLine {
    type Err = HandshakeError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != FIELD_COUNT {
            return Err(HandshakeError::Malformed(format!(
                "expected {FIELD_COUNT} fields, got {}: '{line}'",
                fields.len()
            )));
        }

        let parse_version = |field: &str, what: &str| {
            field.parse::<u32>().map_err(|_| {
                HandshakeError::Malformed(format!("{what} '{field}' is not a number"))
            })
        };

        let core_version = parse_version(fields[0], "core protocol version")?;
        let protocol_version = parse_version(fields[1], "protocol version")?;
        let network: Network = fields[2].parse()?;

        let address = fields[3];
        if address.is_empty() {
            return Err(HandshakeError::Malformed("empty address".to_string()));
        }

        let protocol = fields[4];
        if protocol != PROTOCOL_NAME {
            return Err(HandshakeError::Malformed(format!(
                "unsupported protocol '{protocol}'"
            )));
        }

        Ok(Self {
            core_version,
            protocol_version,
            network,
            address: address.to_string(),
            protocol: protocol.to_string(),
            cookie: fields[5].to_string(),
        })
    }
}
