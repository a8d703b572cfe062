//! Operating-system/architecture identifiers used as keys in plugin manifests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed enumeration of the platforms plugins are published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatingSystem {
    #[serde(rename = "linux-amd64")]
    LinuxAmd64,
    #[serde(rename = "linux-arm64")]
    LinuxArm64,
    #[serde(rename = "darwin-amd64")]
    DarwinAmd64,
    #[serde(rename = "darwin-arm64")]
    DarwinArm64,
    #[serde(rename = "windows-amd64")]
    WindowsAmd64,
    #[serde(rename = "windows-arm64")]
    WindowsArm64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported platform: {os}/{arch}")]
pub struct UnsupportedPlatform {
    pub os: String,
    pub arch: String,
}

impl OperatingSystem {
    pub const ALL: [OperatingSystem; 6] = [
        OperatingSystem::LinuxAmd64,
        OperatingSystem::LinuxArm64,
        OperatingSystem::DarwinAmd64,
        OperatingSystem::DarwinArm64,
        OperatingSystem::WindowsAmd64,
        OperatingSystem::WindowsArm64,
    ];

    /// Detect the platform this process is running on.
    pub fn current() -> Result<Self, UnsupportedPlatform> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map Rust's `target_os`/`target_arch` names onto a manifest identifier.
    pub fn from_parts(os: &str, arch: &str) -> Result<Self, UnsupportedPlatform> {
        let platform = match (os, arch) {
            ("linux", "x86_64") => Self::LinuxAmd64,
            ("linux", "aarch64") => Self::LinuxArm64,
            ("macos", "x86_64") => Self::DarwinAmd64,
            ("macos", "aarch64") => Self::DarwinArm64,
            ("windows", "x86_64") => Self::WindowsAmd64,
            ("windows", "aarch64") => Self::WindowsArm64,
            _ => {
                return Err(UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
        };
        Ok(platform)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinuxAmd64 => "linux-amd64",
            Self::LinuxArm64 => "linux-arm64",
            Self::DarwinAmd64 => "darwin-amd64",
            Self::DarwinArm64 => "darwin-arm64",
            Self::WindowsAmd64 => "windows-amd64",
            Self::WindowsArm64 => "windows-arm64",
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::WindowsAmd64 | Self::WindowsArm64)
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingSystem {
    type Err = UnsupportedPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == s)
            .ok_or_else(|| {
                let (os, arch) = s.split_once('-').unwrap_or((s, ""));
                UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                }
            })
    }
}
