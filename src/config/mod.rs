//! Connection and adapter configuration

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AdapterError;

/// Room server credentials, passed through to the room client untouched.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LiveKitConfig {
    pub host: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("host", &self.host)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl LiveKitConfig {
    /// Reject obviously unusable credentials before dialing out.
    pub fn validate(&self) -> std::result::Result<(), AdapterError> {
        let missing = [
            ("host", &self.host),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty());

        match missing {
            Some((name, _)) => Err(AdapterError::InvalidConfig(format!("{} is empty", name))),
            None => Ok(()),
        }
    }
}

/// Adapter tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Capacity of the keyframe request queue; extra requests are dropped.
    pub keyframe_queue_capacity: usize,
    /// Minimum spacing between two PLIs for the same track, in milliseconds.
    pub pli_throttle_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            keyframe_queue_capacity: 32,
            pli_throttle_ms: 500,
        }
    }
}

impl AdapterConfig {
    pub fn pli_throttle(&self) -> Duration {
        Duration::from_millis(self.pli_throttle_ms)
    }
}

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub livekit: LiveKitConfig,
    pub adapter: AdapterConfig,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "room-recorder-adapter", "room-recorder-adapter")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the platform config directory
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the API secret)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }
}
