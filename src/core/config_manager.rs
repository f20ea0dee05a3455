// src/core/config_manager.rs
//! Unified configuration: one load, typed views for each component

use anyhow::Result;
use std::time::Duration;
use tracing::info;

use crate::environment::EnvironmentConfig;
use crate::hub::{HubConfig, RetryPolicy};

#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub environment: EnvironmentConfig,
    pub service: ServiceConfig,
    pub listener: ListenerConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_base_url: String,
    pub timeout_seconds: u64,
}

/// Per-session knobs
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub push_events: Vec<String>,
    pub poll_interval: Duration,
    pub quiet_period_ms: i64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::from_environment(&EnvironmentConfig::default())
    }
}

impl ListenerConfig {
    fn from_environment(env: &EnvironmentConfig) -> Self {
        Self {
            push_events: env.push_events.clone(),
            poll_interval: Duration::from_millis(env.poll_interval_ms),
            quiet_period_ms: env.quiet_period_ms,
        }
    }
}

impl ConfigManager {
    /// Load all configurations
    pub fn load() -> Result<Self> {
        let environment = EnvironmentConfig::load()?;
        info!(
            "Hub: {}, API: {}",
            environment.hub_url, environment.api_base_url
        );
        Ok(Self::from_environment(environment))
    }

    pub fn from_environment(environment: EnvironmentConfig) -> Self {
        let service = ServiceConfig {
            api_base_url: environment.api_base_url.clone(),
            timeout_seconds: environment.request_timeout_seconds,
        };
        let listener = ListenerConfig::from_environment(&environment);

        Self {
            environment,
            service,
            listener,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        let mut hub = HubConfig::new(self.environment.hub_url.clone());
        hub.retry = RetryPolicy {
            max_attempts: self.environment.connect_attempts,
            base_delay: Duration::from_millis(self.environment.connect_base_delay_ms),
        };
        hub
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_follow_environment() {
        let env = EnvironmentConfig {
            connect_attempts: 5,
            connect_base_delay_ms: 100,
            poll_interval_ms: 750,
            ..EnvironmentConfig::default()
        };
        let config = ConfigManager::from_environment(env);

        let hub = config.hub_config();
        assert_eq!(hub.retry.max_attempts, 5);
        assert_eq!(hub.retry.base_delay, Duration::from_millis(100));
        assert_eq!(hub.join_group_method, "JoinGroup");
        assert_eq!(config.listener.poll_interval, Duration::from_millis(750));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_listener() {
        let listener = ListenerConfig::default();
        assert_eq!(listener.poll_interval, Duration::from_secs(3));
        assert_eq!(listener.quiet_period_ms, 1_500);
        assert!(listener.push_events.iter().any(|e| e == "NewMessage"));
    }
}
