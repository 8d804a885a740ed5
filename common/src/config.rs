// Configuration management with layered configuration (file, env)

use crate::errors::ScheduleError;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Name of the scheduler instance created when no properties file is configured
pub const DEFAULT_INSTANCE_NAME: &str = "DefaultScheduler";

/// Configuration key naming the optional engine properties file
pub const PROPERTIES_FILE_KEY: &str = "scheduler.properties_file";

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Path of a TOML file holding [`EngineProperties`]
    pub properties_file: Option<String>,
    /// IANA zone used for trigger bounds and cron evaluation
    pub timezone: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            properties_file: None,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

/// Tunables of a scheduler instance, read from the properties file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineProperties {
    pub instance_name: String,
    pub thread_count: usize,
    pub misfire_threshold_ms: u64,
}

impl Default for EngineProperties {
    fn default() -> Self {
        Self {
            instance_name: DEFAULT_INSTANCE_NAME.to_string(),
            thread_count: 10,
            misfire_threshold_ms: 60_000,
        }
    }
}

impl EngineProperties {
    /// Load engine properties from an optional file; `None` yields the defaults
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        Config::builder()
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()
    }

    /// Lateness after which a fire counts as misfired; huge values saturate
    pub fn misfire_threshold(&self) -> chrono::Duration {
        i64::try_from(self.misfire_threshold_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Load the raw layered configuration: defaults → local → env
pub fn load_config<P: AsRef<Path>>(config_dir: P) -> Result<Config, ConfigError> {
    let config_dir = config_dir.as_ref();

    Config::builder()
        .add_source(File::from(config_dir.join("default.toml")).required(false))
        // Local configuration (not committed to git)
        .add_source(File::from(config_dir.join("local.toml")).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
}

impl Settings {
    /// Load configuration from the default `config` directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        Self::from_config(&load_config(config_dir)?)
    }

    /// Extract typed settings from an already built configuration
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.clone().try_deserialize()
    }

    /// Zone used for trigger bounds and cron evaluation
    pub fn timezone(&self) -> Result<Tz, ScheduleError> {
        self.scheduler
            .timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(self.scheduler.timezone.clone()))
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        self.timezone().map_err(|e| e.to_string())?;

        if self.observability.metrics_port == Some(0) {
            return Err("Metrics port must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Key/value lookup consulted when resolving cron sources
#[cfg_attr(test, mockall::automock)]
pub trait PropertySource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl PropertySource for Config {
    fn get(&self, key: &str) -> Option<String> {
        // Literal cron text is not a valid path; any lookup error means "absent"
        self.get_string(key).ok()
    }
}

impl PropertySource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}
