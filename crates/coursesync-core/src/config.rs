//! Application configuration management.
//!
//! Configuration is stored at `~/.config/coursesync/config.json` and falls
//! back to defaults when the file is absent. `COURSESYNC_API_URL` and
//! `COURSESYNC_TOKEN` override the file at load time.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::BATCH_PROGRESS_PATH;
use crate::api::CatalogTtls;

/// Application name used for config/data directory paths
const APP_NAME: &str = "coursesync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    /// Teardown beacon target; defaults to the batch progress endpoint
    pub beacon_url: Option<String>,
    pub classroom_prefix: String,
    pub debounce_ms: u64,
    pub courses_ttl_secs: u64,
    pub course_detail_ttl_secs: u64,
    pub trainers_ttl_secs: u64,
    pub cache_sweep_secs: u64,
    pub data_dir: Option<PathBuf>,
    /// Bearer token, normally supplied through the environment
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            beacon_url: None,
            classroom_prefix: "/classroom".to_string(),
            debounce_ms: 500,
            courses_ttl_secs: 60,
            course_detail_ttl_secs: 120,
            trainers_ttl_secs: 60,
            cache_sweep_secs: 300,
            data_dir: None,
            api_token: None,
        }
    }
}

impl Config {
    /// Load the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_json(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config file")
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("COURSESYNC_API_URL").filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(token) = var("COURSESYNC_TOKEN").filter(|v| !v.is_empty()) {
            self.api_token = Some(token);
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for persisted progress and logs.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn beacon_url(&self) -> String {
        self.beacon_url.clone().unwrap_or_else(|| {
            format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                BATCH_PROGRESS_PATH
            )
        })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs.max(1))
    }

    pub fn catalog_ttls(&self) -> CatalogTtls {
        CatalogTtls {
            courses: Duration::from_secs(self.courses_ttl_secs),
            course_detail: Duration::from_secs(self.course_detail_ttl_secs),
            trainers: Duration::from_secs(self.trainers_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_json(r#"{"debounce_ms": 250}"#).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.classroom_prefix, "/classroom");
        assert_eq!(config.catalog_ttls(), CatalogTtls::default());
    }

    #[test]
    fn test_beacon_url_defaults_to_batch_endpoint() {
        let mut config = Config {
            api_base_url: "https://learn.example.com/api/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.beacon_url(), "https://learn.example.com/api/progress/batch");

        config.beacon_url = Some("https://beacon.example.com/b".to_string());
        assert_eq!(config.beacon_url(), "https://beacon.example.com/b");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            "COURSESYNC_API_URL" => Some("https://api.test".to_string()),
            "COURSESYNC_TOKEN" => Some("tok".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://api.test");
        assert_eq!(config.api_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = Config::default();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.api_token, None);
    }

    #[test]
    fn test_token_never_written_to_disk() {
        let config = Config {
            api_token: Some("secret".to_string()),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_explicit_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/coursesync-test")),
            ..Config::default()
        };
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/coursesync-test"));
    }
}
