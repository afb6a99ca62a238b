//! Launcher configuration: the persisted install path and the patch server
//! address.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_SERVER: &str = "epic-shard.com:2595";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("expected hostname:port, e.g. epic-shard.com:2595")]
    MissingSeparator,
    #[error("port {0:?} is not a number")]
    InvalidPort(String),
    #[error("port must be between 1 and 65535, got {0}")]
    PortOutOfRange(u64),
    #[error("could not resolve {host}: {source}")]
    Resolve { host: String, source: std::io::Error },
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no home directory to keep the config file in")]
    NoHomeDirectory,
}

/// `~/.epic_shard_launcher`
pub fn launcher_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".epic_shard_launcher"))
}

/// A validated `hostname:port` pair. Not resolved until a session needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Looks the hostname up and returns the first address.
    pub async fn resolve(&self) -> Result<SocketAddr, ConfigError> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| ConfigError::Resolve { host: self.host.clone(), source })?;
        addrs.next().ok_or_else(|| ConfigError::NoAddress(self.host.clone()))
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self { host: "epic-shard.com".to_string(), port: 2595 }
    }
}

impl FromStr for ServerAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.split_once(':') {
            Some((host, port)) if !port.contains(':') => (host, port),
            _ => return Err(ConfigError::MissingSeparator),
        };
        let port: u64 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
        if !(1..=65535).contains(&port) {
            return Err(ConfigError::PortOutOfRange(port));
        }
        Ok(Self { host: host.trim().to_string(), port: port as u16 })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The user-editable server setting. An edit only takes effect once the new
/// address parses and resolves.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    address: ServerAddress,
}

impl ServerSettings {
    pub fn new(address: ServerAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub async fn update(&mut self, input: &str) -> Result<SocketAddr, ConfigError> {
        let candidate: ServerAddress = input.parse()?;
        let resolved = candidate.resolve().await?;
        info!(server = %candidate, %resolved, "server address updated");
        self.address = candidate;
        Ok(resolved)
    }
}

/// `{ "install_path": "..." }`, persisted per user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub install_path: String,
}

impl LauncherConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        launcher_dir()
            .map(|dir| dir.join("config.json"))
            .ok_or(ConfigError::NoHomeDirectory)
    }

    /// A missing or corrupt config file means "no install path chosen yet".
    pub async fn load(path: &Path) -> Self {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
                return Self::default();
            }
        };
        serde_json::from_slice(&data).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "config corrupt, using defaults");
            Self::default()
        })
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec(self)?).await?;
        Ok(())
    }

    /// The configured install root, if one has been chosen.
    pub fn install_root(&self) -> Option<PathBuf> {
        if self.install_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.install_path))
        }
    }
}
