use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

use crate::model::Credentials;
use crate::retry::RetryPolicy;

/// Credentials for the primary banking system.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryConfig {
    pub username: String,
    pub password: SecretString,
}

impl PrimaryConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// The secondary system that ingests exported files. Optional: without it
/// the upload stage is simply unavailable.
#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryConfig {
    pub base_url: String,
    pub username: String,
    pub password: SecretString,
}

impl SecondaryConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Browser/driver settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Explicit browser binary; otherwise well-known locations are probed.
    pub executable_path: Option<PathBuf>,

    /// HTTP proxy in `host:port` form.
    pub proxy: Option<String>,

    /// Where exports land. Defaults to the working directory.
    pub download_dir: Option<PathBuf>,

    /// Run the browser without a window.
    pub headless: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            proxy: None,
            download_dir: None,
            headless: false,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub primary: Option<PrimaryConfig>,

    pub secondary: Option<SecondaryConfig>,

    pub driver: DriverConfig,

    pub retry: RetryPolicy,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return defaults if it doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Primary credentials, required for the export stage.
    pub fn primary_credentials(&self) -> Result<Credentials> {
        let primary = self
            .primary
            .as_ref()
            .context("config has no [primary] section; export needs bank credentials")?;
        Ok(primary.credentials())
    }
}

/// Default config file path: `./ofxferry.toml` if present, otherwise under
/// the user config directory.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from("ofxferry.toml");
    if local.exists() {
        return local;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("ofxferry").join("ofxferry.toml");
    }

    local
}
