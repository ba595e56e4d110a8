//! Taskweave configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskweaveError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskweaveConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for TaskweaveConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl TaskweaveConfig {
    /// Load config from the default path (~/.taskweave/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskweaveError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TaskweaveError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TaskweaveError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Taskweave home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskweave")
    }
}

/// Model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Whether a model backend is configured at all. When false the
    /// pipeline runs in degraded mode with placeholder stage outputs.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
}

fn bool_true() -> bool {
    true
}
fn default_provider() -> String {
    "openai".into()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_chat_path() -> String {
    "/chat/completions".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            chat_path: default_chat_path(),
        }
    }
}

impl LlmConfig {
    /// A backend counts as configured when enabled and an endpoint is set.
    pub fn configured(&self) -> bool {
        self.enabled && !self.endpoint.is_empty()
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-task scans.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Max tasks claimed per scan.
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,
}

fn default_interval_secs() -> u64 {
    30
}
fn default_batch_cap() -> usize {
    20
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_cap: default_batch_cap(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    TaskweaveConfig::home_dir()
        .join("taskweave.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}
