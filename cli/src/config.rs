// Configuration management for the pstate CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/pstate/config.json
// - Linux: ~/.config/pstate/config.json
// - Windows: %APPDATA%\pstate\config.json

use anyhow::{Context, Result};
use pstate_core::config::DEFAULT_METRICS_NAMESPACE;
use pstate_core::DatabaseSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Invalid log format: {} (expected text or json)", other),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection descriptor, e.g. `sqlite:/var/lib/pstate/state.db`
    pub db_url: String,

    pub db_user: Option<String>,

    pub db_password: Option<String>,

    /// Log every executed statement at debug level
    #[serde(default)]
    pub log_queries: bool,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_metrics_namespace() -> String {
    DEFAULT_METRICS_NAMESPACE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        let db_url = Self::data_dir()
            .map(|dir| DatabaseSettings::sqlite(dir.join("state.db")).url)
            .unwrap_or_else(|_| DatabaseSettings::default().url);

        Self {
            db_url,
            db_user: None,
            db_password: None,
            log_queries: false,
            log_format: LogFormat::Text,
            metrics_namespace: default_metrics_namespace(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("pstate");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("pstate");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, or create it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. The caller persists the result.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "db_url" => {
                if value.is_empty() {
                    anyhow::bail!("db_url cannot be empty");
                }
                self.db_url = value.to_string();
            }
            "db_user" => self.db_user = optional(value),
            "db_password" => self.db_password = optional(value),
            "log_queries" => {
                self.log_queries = value.parse().context("Invalid boolean value")?;
            }
            "log_format" => self.log_format = value.parse()?,
            "metrics_namespace" => {
                if value.is_empty() {
                    anyhow::bail!("metrics_namespace cannot be empty");
                }
                self.metrics_namespace = value.to_string();
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "db_url" => Some(self.db_url.clone()),
            "db_user" => self.db_user.clone(),
            "db_password" => self.db_password.as_ref().map(|_| "********".to_string()),
            "log_queries" => Some(self.log_queries.to_string()),
            "log_format" => Some(self.log_format.to_string()),
            "metrics_namespace" => Some(self.metrics_namespace.clone()),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("db_url".to_string(), self.db_url.clone()),
            ("db_user".to_string(), self.db_user.clone().unwrap_or_else(|| "(none)".to_string())),
            (
                "db_password".to_string(),
                self.get("db_password").unwrap_or_else(|| "(none)".to_string()),
            ),
            ("log_queries".to_string(), self.log_queries.to_string()),
            ("log_format".to_string(), self.log_format.to_string()),
            ("metrics_namespace".to_string(), self.metrics_namespace.clone()),
        ]
    }

    /// Database settings handed to the core library.
    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            url: self.db_url.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            log_queries: self.log_queries,
            metrics_namespace: self.metrics_namespace.clone(),
        }
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
