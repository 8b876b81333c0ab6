//! Configuration structures and parsing for hostgate

use crate::services::{parse_services, ServiceDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid service definition: {0}")]
    InvalidServiceDefinition(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service definitions: `name,domain,strategy,host:port,...` records separated by `;`
    #[serde(default)]
    pub services: String,

    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Endpoint health probing
    #[serde(default)]
    pub health_check: HealthCheckOptions,

    /// Response caching
    #[serde(default)]
    pub cache: CacheOptions,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = ?path.as_ref(), "Configuration loaded");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "global.listen must not be empty".to_string(),
            ));
        }

        if self.global.request_timeout == 0 {
            return Err(ConfigError::Validation(
                "global.request_timeout must be greater than zero".to_string(),
            ));
        }

        // Intervals and timeouts must be positive
        for (field, value) in [
            ("health_check.interval", &self.health_check.interval),
            ("health_check.timeout", &self.health_check.timeout),
            ("cache.timeout", &self.cache.timeout),
        ] {
            match parse_duration(value) {
                Some(d) if !d.is_zero() => {}
                Some(_) => {
                    return Err(ConfigError::Validation(format!(
                        "{} must be greater than zero",
                        field
                    )))
                }
                None => {
                    return Err(ConfigError::Validation(format!(
                        "Invalid {}: '{}'",
                        field, value
                    )))
                }
            }
        }

        if self.cache.enabled
            && self.cache.backend == CacheBackend::Redis
            && self.cache.url.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "cache.url is required for the redis backend".to_string(),
            ));
        }

        self.service_definitions()?;
        Ok(())
    }

    /// Parse the configured service definitions
    pub fn service_definitions(&self) -> Result<Vec<ServiceDefinition>, ConfigError> {
        parse_services(&self.services)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: String::new(),
            global: GlobalConfig::default(),
            health_check: HealthCheckOptions::default(),
            cache: CacheOptions::default(),
        }
    }
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Inbound listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Deadline for a single forwarding attempt, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Grace period for shutdown in seconds
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
}

impl GlobalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_grace_period() -> u64 {
    5
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
            request_timeout: default_request_timeout(),
            grace_period: default_grace_period(),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckOptions {
    /// Run the background prober
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,

    /// Probe interval (e.g., "5s", "1m")
    #[serde(default = "default_health_interval")]
    pub interval: String,

    /// Connect timeout per probe
    #[serde(default = "default_health_timeout")]
    pub timeout: String,
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_interval() -> String {
    "5s".to_string()
}

fn default_health_timeout() -> String {
    "1s".to_string()
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

/// Where cached responses are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// In-process, size-bounded map
    #[default]
    Memory,
    /// External Redis server at `cache.url`
    Redis,
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redis => f.write_str("redis"),
        }
    }
}

/// Response caching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Enable caching
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Store backend
    #[serde(default)]
    pub backend: CacheBackend,

    /// Redis connection URL (redis backend only)
    #[serde(default = "default_cache_url")]
    pub url: String,

    /// Deadline for a single store operation (redis backend only)
    #[serde(default = "default_cache_timeout")]
    pub timeout: String,

    /// Maximum size of a single stored entry in bytes
    #[serde(default = "default_cache_max_entry_size")]
    pub max_entry_size: usize,

    /// Maximum total store size in bytes (approximate)
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_cache_timeout() -> String {
    "1s".to_string()
}

fn default_cache_max_entry_size() -> usize {
    10 * 1024 * 1024
}

fn default_cache_max_size() -> usize {
    100 * 1024 * 1024
}

impl CacheOptions {
    /// Store operation deadline; `validate` guarantees it parses
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout)
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(1))
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            backend: CacheBackend::default(),
            url: default_cache_url(),
            timeout: default_cache_timeout(),
            max_entry_size: default_cache_max_entry_size(),
            max_size: default_cache_max_size(),
        }
    }
}

/// Parse a duration string such as `500ms`, `5s`, `1m`, `2h` or a bare number of seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num) = s.strip_suffix("ms") {
        num.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(num) = s.strip_suffix('s') {
        num.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(num) = s.strip_suffix('m') {
        num.parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(num) = s.strip_suffix('h') {
        num.parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
