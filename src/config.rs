use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::stores::Session;

/// Application configuration
///
/// Besides the backend coordinates, the config file carries the last
/// session so a new process can rehydrate without re-entering a password.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Supabase-style backend
    pub supabase_url: Option<String>,
    /// Anonymous API key for that backend
    pub anon_key: Option<String>,
    /// Session persisted by the last sign-in, if any
    pub session: Option<Session>,
    /// Path this config was loaded from
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_config_path);

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?
        } else {
            Self::default()
        };
        config.config_file = Some(path);

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("MACROLOG_SUPABASE_URL") {
            config.supabase_url = Some(url);
        }
        if let Ok(key) = std::env::var("MACROLOG_ANON_KEY") {
            config.anon_key = Some(key);
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/macrolog/config.yaml
    pub fn default_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("macrolog")
            .join("config.yaml")
    }

    /// True once the backend coordinates are set.
    pub fn is_configured(&self) -> bool {
        self.supabase_url.is_some() && self.anon_key.is_some()
    }

    /// Writes the config back to the path it was loaded from.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self
            .config_file
            .clone()
            .unwrap_or_else(Self::default_config_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
        }

        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        std::fs::write(&path, yaml).map_err(|e| ConfigError::ReadError(path.clone(), e))?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
