//! Client configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! selects the backend base URL, the client platform and the storage backend
//! used for the credential.
//!
//! Configuration is stored at `~/.config/optionix/config.json`. Environment
//! variables (`OPTIONIX_API_URL`, `OPTIONIX_API_TIMEOUT_MS`,
//! `OPTIONIX_PLATFORM`) take precedence over the file.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Application name used for config/data/cache directory paths
pub const APP_NAME: &str = "optionix";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend used when nothing else is configured.
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

const ENV_API_URL: &str = "OPTIONIX_API_URL";
const ENV_API_TIMEOUT_MS: &str = "OPTIONIX_API_TIMEOUT_MS";
const ENV_PLATFORM: &str = "OPTIONIX_PLATFORM";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },
}

/// Which client flavor this process behaves as.
///
/// The mobile and web clients talk to the same backend but differ in where
/// the credential lives, which profile endpoint they call and how the login
/// body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Mobile,
    Web,
}

/// How the login request body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEncoding {
    /// JSON `{ "email", "password" }`
    Json,
    /// Form `username=..&password=..`
    Form,
}

impl Platform {
    /// Fixed key the credential is persisted under.
    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::Mobile => "authToken",
            Self::Web => "auth_token",
        }
    }

    /// Endpoint returning the signed-in user's profile.
    pub fn profile_path(&self) -> &'static str {
        match self {
            Self::Mobile => "/auth/profile",
            Self::Web => "/auth/me",
        }
    }

    pub fn login_encoding(&self) -> LoginEncoding {
        match self {
            Self::Mobile => LoginEncoding::Json,
            Self::Web => LoginEncoding::Form,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Mobile => Duration::from_millis(30_000),
            Self::Web => Duration::from_millis(15_000),
        }
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(Self::Mobile),
            "web" => Ok(Self::Web),
            _ => Err(ConfigError::UnknownValue {
                kind: "platform",
                value: s.to_string(),
            }),
        }
    }
}

/// Where the credential is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS keychain via `keyring`
    Keyring,
    /// Versioned JSON file in the user data directory
    #[default]
    File,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            _ => Err(ConfigError::UnknownValue {
                kind: "storage backend",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub platform: Platform,
    pub storage: StorageBackend,
    /// Overrides the platform's default timeout when set.
    pub request_timeout_ms: Option<u64>,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            platform: Platform::default(),
            storage: StorageBackend::default(),
            request_timeout_ms: None,
            last_email: None,
        }
    }
}

impl Config {
    /// Load config from disk (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env();
        debug!(?path, platform = ?config.platform, "Config loaded");
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `OPTIONIX_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(raw) = lookup(ENV_API_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.request_timeout_ms = Some(ms),
                Err(_) => warn!(value = %raw, "Ignoring invalid {}", ENV_API_TIMEOUT_MS),
            }
        }
        if let Some(raw) = lookup(ENV_PLATFORM) {
            match raw.parse() {
                Ok(platform) => self.platform = platform,
                Err(e) => warn!(error = %e, "Ignoring invalid {}", ENV_PLATFORM),
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.platform.default_timeout())
    }

    /// Directory holding file-backed credentials.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_local_dir().ok_or(ConfigError::NoDirectory("data"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDirectory("cache"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}
