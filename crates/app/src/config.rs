use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "kesef.toml";
pub const DEFAULT_API_KEY_ENV: &str = "KESEF_EXTRACTION_API_KEY";

/// Settings read from `kesef.toml`. Every field has a default, so an absent
/// file or an empty one is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub default_currency: String,
    pub processing_timeout_secs: u64,
    pub stale_after_secs: u64,
    pub poll_interval_ms: u64,
    pub max_upload_bytes: u64,
    pub rules_file: Option<PathBuf>,
    pub banks_file: Option<PathBuf>,
    pub extraction: Option<ExtractionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_currency: "ILS".to_string(),
            processing_timeout_secs: 300,
            stale_after_secs: 900,
            poll_interval_ms: 1500,
            max_upload_bytes: 20 * 1024 * 1024,
            rules_file: None,
            banks_file: None,
            extraction: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ExtractionConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl Config {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// `data_dir` from the file, else the platform data directory.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let dirs = project_dirs()?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "kesef", "Kesef")
        .context("no home directory to place kesef data in")
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("parse kesef.toml")
}

/// Load an explicit config file (which must exist), or the platform one
/// (which may not).
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = project_dirs()?.config_dir().join(CONFIG_FILE);
            if !path.exists() {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            path
        }
    };
    let content =
        std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let config = parse_config(&content)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}
