//! Configuration system for the dew point controller
//!
//! Configuration is read from a TOML file and then overlaid with environment
//! variables, so deployments can keep credentials and broker addresses out of
//! the file. Every field has a default; an empty file is a valid configuration.

use crate::connection::ReconnectConfig;
use crate::sensors::Location;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main controller configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ControllerConfig {
    /// Application environment, drives the default log level
    pub app_env: AppEnv,
    pub mqtt: MqttSection,
    pub reconnect: ReconnectSection,
    pub sensors: SensorsSection,
    pub service: ServiceSection,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Client identifier presented to the broker
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Resume the broker-side session on reconnect when false
    pub clean_session: bool,
    pub keep_alive_secs: u64,
    /// Upper bound on a single connect attempt
    pub connect_timeout_secs: u64,
    /// Capacity of the client request channel
    pub request_capacity: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://127.0.0.1:1883".to_string(),
            client_id: "dewPoint-controller".to_string(),
            username_env: Some("MQTT_USERNAME".to_string()),
            password_env: Some("MQTT_PASSWORD".to_string()),
            clean_session: false,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            request_capacity: 64,
        }
    }
}

impl MqttSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Get MQTT username from environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_deref())
    }

    /// Get MQTT password from environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_deref())
    }
}

/// Reconnect backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    /// Delays for the first attempts, in milliseconds
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay_ms: u64,
    /// Keep retrying when the very first connect fails
    pub retry_initial_connect: bool,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_pattern_ms: vec![250, 500, 1000, 2000, 5000],
            sustained_delay_ms: 5000,
            retry_initial_connect: true,
        }
    }
}

impl ReconnectSection {
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: None,
            backoff_pattern: self.backoff_pattern_ms.clone(),
            sustained_delay: self.sustained_delay_ms,
        }
    }
}

/// Tracked sensor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorsSection {
    /// Prefix prepended to every sensor topic
    pub topic_prefix: String,
    /// Installation altitude, used for enthalpy
    pub altitude_feet: f64,
    pub locations: Vec<Location>,
}

impl Default for SensorsSection {
    fn default() -> Self {
        Self {
            topic_prefix: "frankensystem".to_string(),
            altitude_feet: 800.0,
            locations: Location::all().to_vec(),
        }
    }
}

/// Service lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceSection {
    /// Bound on the final publish flush during shutdown
    pub shutdown_timeout_secs: u64,
    /// Bound on the whole graceful stop after a signal
    pub grace_period_secs: u64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 3,
            grace_period_secs: 10,
        }
    }
}

impl ServiceSection {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Application environments
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Development,
    Production,
    Staging,
    Testing,
}

impl AppEnv {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" => Some(AppEnv::Development),
            "production" => Some(AppEnv::Production),
            "staging" => Some(AppEnv::Staging),
            "testing" => Some(AppEnv::Testing),
            _ => None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ControllerConfig {
    /// Load configuration from TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parse configuration from TOML text, then apply environment overrides
    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: ControllerConfig = toml::from_str(content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ControllerConfig::default();
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables onto the loaded configuration
    ///
    /// The lookup is injected so overrides can be exercised without touching
    /// the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(app_env) = lookup("APP_ENV") {
            self.app_env = AppEnv::parse(&app_env).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("Unknown APP_ENV '{app_env}'"))
            })?;
        }

        let host = lookup("MQTT_HOST");
        let port = lookup("MQTT_PORT");
        if host.is_some() || port.is_some() {
            let mut url = Url::parse(&self.mqtt.broker_url)
                .map_err(|_| ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()))?;
            if let Some(host) = host {
                url.set_host(Some(&host))
                    .map_err(|_| ConfigError::InvalidBrokerUrl(format!("host '{host}'")))?;
            }
            if let Some(port) = port {
                let port: u16 = port
                    .parse()
                    .map_err(|_| ConfigError::InvalidConfig(format!("Invalid MQTT_PORT '{port}'")))?;
                url.set_port(Some(port))
                    .map_err(|_| ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()))?;
            }
            self.mqtt.broker_url = url.to_string();
        }

        if let Some(identifier) = lookup("MQTT_IDENTIFIER") {
            self.mqtt.client_id = identifier;
        }
        if let Some(prefix) = lookup("TOPIC_PREFIX") {
            self.sensors.topic_prefix = prefix;
        }

        Ok(())
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.mqtt.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()))?;
        if !matches!(url.scheme(), "mqtt" | "mqtts") || url.host_str().is_none() {
            return Err(ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()));
        }

        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id must not be empty".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.sustained_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.sustained_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.sensors.locations.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "sensors.locations must name at least one location".to_string(),
            ));
        }
        for (index, location) in self.sensors.locations.iter().enumerate() {
            if self.sensors.locations[..index].contains(location) {
                return Err(ConfigError::InvalidConfig(format!(
                    "sensors.locations lists '{location}' more than once"
                )));
            }
        }

        Ok(())
    }
}

fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}
