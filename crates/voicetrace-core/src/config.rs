//! Configuration management for VoiceTrace
//!
//! Every section has safe defaults, so a missing file or an empty
//! environment never prevents tracking: unknown providers cost nothing and
//! the recency window holds 100 traces.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collector::ModelPricing;
use crate::error::Result;

/// Prefix for environment overrides, e.g. `VOICETRACE__STORE__WINDOW_SIZE=250`
pub const ENV_PREFIX: &str = "VOICETRACE";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Trace store configuration
    pub store: StoreConfig,

    /// Pricing table configuration
    pub pricing: PricingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file, overlaid by `VOICETRACE__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
    /// Prometheus exporter port (disabled when unset)
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            metrics_port: None,
        }
    }
}

/// Trace store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON record per trace
    pub directory: PathBuf,
    /// Maximum number of traces kept in memory
    pub window_size: usize,
    /// Reload the newest records into the window on startup
    pub load_on_start: bool,
    /// Write durable records (memory-only when false)
    pub persist: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_record_dir(),
            window_size: 100,
            load_on_start: true,
            persist: true,
        }
    }
}

fn default_record_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "voicetrace", "voicetrace")
        .map(|dirs| dirs.data_dir().join("traces"))
        .unwrap_or_else(|| PathBuf::from("logs/observability"))
}

/// Pricing table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Start from the built-in provider table
    pub include_defaults: bool,
    /// Additional or overriding entries keyed by provider/model id
    pub models: HashMap<String, ModelPricing>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            include_defaults: true,
            models: HashMap::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Directory for daily-rotated JSON log files
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}
