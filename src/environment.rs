// src/environment.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub hub_url: String,
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub quiet_period_ms: i64,
    pub connect_attempts: u32,
    pub connect_base_delay_ms: u64,
    pub push_events: Vec<String>,
    pub log_file: PathBuf,
    pub log_directive: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://127.0.0.1:5000/chathub".to_string(),
            api_base_url: "http://127.0.0.1:5000/api".to_string(),
            request_timeout_seconds: 30,
            poll_interval_ms: 3_000,
            quiet_period_ms: 1_500,
            connect_attempts: 3,
            connect_base_delay_ms: 2_000,
            push_events: vec![
                "ReceiveMessage".to_string(),
                "NewMessage".to_string(),
                "ReceiveNotification".to_string(),
            ],
            log_file: PathBuf::from("/tmp/jobhub.log"),
            log_directive: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    local: EnvironmentConfig,
    #[serde(default)]
    production: EnvironmentConfig,
}

impl EnvironmentConfig {
    /// Load configuration based on environment
    pub fn load() -> Result<Self> {
        let environment = Self::get_environment();
        info!("Loading configuration for environment: {}", environment);

        let config = Self::load_from_file(Path::new(CONFIG_FILE), &environment)?;
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn get_environment() -> String {
        std::env::var("JOBHUB_ENV")
            .or_else(|_| std::env::var("ENVIRONMENT"))
            .or_else(|_| std::env::var("ENV"))
            .unwrap_or_else(|_| "local".to_string())
    }

    /// Missing file means built-in defaults; an unreadable one is an error
    pub fn load_from_file(config_path: &Path, environment: &str) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "{} not found, using built-in defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let config_content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_yaml(&config_content, environment)
    }

    pub fn from_yaml(content: &str, environment: &str) -> Result<Self> {
        let config_file: ConfigFile =
            serde_yaml::from_str(content).context("Failed to parse config.yaml")?;

        Ok(match environment {
            "production" => config_file.production,
            _ => config_file.local,
        })
    }

    /// Apply `JOBHUB_HUB_URL` / `JOBHUB_API_URL` from the given lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("JOBHUB_HUB_URL").filter(|v| !v.trim().is_empty()) {
            self.hub_url = url;
        }
        if let Some(url) = lookup("JOBHUB_API_URL").filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
local:
  hub_url: "http://localhost:5000/chathub"
  poll_interval_ms: 1000
production:
  hub_url: "https://jobs.example.com/chathub"
  api_base_url: "https://jobs.example.com/api"
  push_events: ["ReceiveMessage"]
"#;

    #[test]
    fn test_selects_section_and_fills_defaults() {
        let local = EnvironmentConfig::from_yaml(SAMPLE, "local").unwrap();
        assert_eq!(local.hub_url, "http://localhost:5000/chathub");
        assert_eq!(local.poll_interval_ms, 1000);
        assert_eq!(local.quiet_period_ms, 1_500);
        assert_eq!(local.push_events.len(), 3);

        let prod = EnvironmentConfig::from_yaml(SAMPLE, "production").unwrap();
        assert_eq!(prod.api_base_url, "https://jobs.example.com/api");
        assert_eq!(prod.push_events, vec!["ReceiveMessage".to_string()]);
        assert_eq!(prod.connect_attempts, 3);
    }

    #[test]
    fn test_unknown_environment_uses_local() {
        let staging = EnvironmentConfig::from_yaml(SAMPLE, "staging").unwrap();
        assert_eq!(staging.poll_interval_ms, 1000);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            EnvironmentConfig::load_from_file(Path::new("/nonexistent/config.yaml"), "local")
                .unwrap();
        assert_eq!(config, EnvironmentConfig::default());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(EnvironmentConfig::from_yaml("local: [", "local").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = EnvironmentConfig::default().with_overrides(|key| match key {
            "JOBHUB_HUB_URL" => Some("wss://hub.test/chathub".to_string()),
            "JOBHUB_API_URL" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.hub_url, "wss://hub.test/chathub");
        assert_eq!(config.api_base_url, EnvironmentConfig::default().api_base_url);
    }
}
