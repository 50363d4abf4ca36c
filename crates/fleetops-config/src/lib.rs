//! User settings for fleetops
//!
//! Settings come from `~/.config/fleetops/config.yaml` (or the file named by
//! `FLEETOPS_CONFIG`) and are overridden by `FLEETOPS_STATE` and
//! `FLEETOPS_DEPLOYMENT`. Command line flags override both.

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "FLEETOPS_CONFIG";
pub const STATE_ENV: &str = "FLEETOPS_STATE";
pub const DEPLOYMENT_ENV: &str = "FLEETOPS_DEPLOYMENT";

/// fleetops configuration directory, created on first use
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("fleetops");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Settings file to read: `FLEETOPS_CONFIG`, else the one in the config dir
pub fn config_file_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(get_config_dir()?.join("config.yaml"))
}

/// Default location of the state file
pub fn default_state_file() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".fleetops").join("deployments.json"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SshSettings {
    pub identity_file: Option<PathBuf>,
    /// Seconds
    pub connect_timeout: u64,
    pub strict_host_key_checking: bool,
    pub extra_args: Vec<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            identity_file: None,
            connect_timeout: 10,
            strict_host_key_checking: false,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub state_file: Option<PathBuf>,
    /// Deployment used when none is given on the command line
    pub deployment: Option<String>,
    /// `-1` means one worker per machine
    pub max_concurrent_copy: i64,
    pub max_concurrent_activate: i64,
    pub build_dir: Option<PathBuf>,
    /// Lock backend name
    pub lock: String,
    /// Storage backend name
    pub storage: String,
    pub ssh: SshSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_file: None,
            deployment: None,
            max_concurrent_copy: 5,
            max_concurrent_activate: -1,
            build_dir: None,
            lock: "file".to_string(),
            storage: "local".to_string(),
            ssh: SshSettings::default(),
        }
    }
}

impl Settings {
    /// Settings file plus environment overrides
    pub fn load() -> Result<Self> {
        let mut settings = Self::from_file(&config_file_path()?)?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Read `path`; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) {
        if let Ok(state) = std::env::var(STATE_ENV)
            && !state.is_empty()
        {
            self.state_file = Some(PathBuf::from(state));
        }
        if let Ok(deployment) = std::env::var(DEPLOYMENT_ENV)
            && !deployment.is_empty()
        {
            self.deployment = Some(deployment);
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("max-concurrent-copy", self.max_concurrent_copy),
            ("max-concurrent-activate", self.max_concurrent_activate),
        ] {
            if value == 0 || value < -1 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{value} (use a positive number or -1 for unlimited)"),
                });
            }
        }
        Ok(())
    }

    pub fn state_file(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => Ok(path.clone()),
            None => default_state_file(),
        }
    }

    /// Where built configurations are written
    pub fn build_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.build_dir {
            return Ok(dir.clone());
        }
        let cache = dirs::cache_dir().ok_or(ConfigError::HomeDirNotFound)?;
        Ok(cache.join("fleetops").join("builds"))
    }
}
