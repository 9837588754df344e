//! Bridge location, read from the shared configuration file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Port the bridge listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3434;

const CONFIG_DIR: &str = "devbridge";
const CONFIG_FILE: &str = "config.json";

/// Where to find the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    server: Option<ServerSection>,
}

#[derive(Deserialize)]
struct ServerSection {
    #[serde(default)]
    port: Option<u16>,
}

impl BridgeConfig {
    /// `<config dir>/devbridge/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location. Never fails; falls back to defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`, falling back to defaults on any problem.
    pub fn load_from(path: &Path) -> Self {
        match Self::try_load_from(path) {
            Ok(config) => config,
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring bridge config");
                Self::default()
            }
        }
    }

    pub fn try_load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&text)?;
        let port = file
            .port
            .or_else(|| file.server.and_then(|s| s.port))
            .filter(|&port| port != 0)
            .unwrap_or(DEFAULT_PORT);
        Ok(Self { port })
    }

    /// WebSocket URL of the bridge on the loopback interface.
    pub fn url(&self) -> String {
        bridge_url(self.port)
    }
}

/// WebSocket URL of a bridge on `port`.
pub fn bridge_url(port: u16) -> String {
    format!("ws://localhost:{port}")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
