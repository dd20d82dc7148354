//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sensorhub_types::MST01;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Gateway ingestion settings.
    pub ingest: IngestConfig,
    /// Scheduled aggregation settings.
    pub aggregation: AggregationConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// ```
    /// use sensorhub_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.ingest.validate());
        errors.extend(self.aggregation.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_bind(field: &str, bind: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if bind.is_empty() {
        errors.push(ValidationError {
            field: field.to_string(),
            message: "bind address cannot be empty".to_string(),
        });
        return errors;
    }

    match bind.rsplit_once(':') {
        None => errors.push(ValidationError {
            field: field.to_string(),
            message: format!("invalid bind address '{}': expected format 'host:port'", bind),
        }),
        Some((_, port)) => match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError {
                field: field.to_string(),
                message: "port cannot be 0".to_string(),
            }),
            Err(_) => errors.push(ValidationError {
                field: field.to_string(),
                message: format!("invalid port '{}': must be a number 1-65535", port),
            }),
            Ok(_) => {}
        },
    }

    errors
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the API (e.g., "127.0.0.1:3000").
    pub bind: String,
    /// Outbound queue length per live viewer; a full queue drops events.
    pub viewer_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            viewer_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = validate_bind("server.bind", &self.bind);

        if self.viewer_buffer == 0 {
            errors.push(ValidationError {
                field: "server.viewer_buffer".to_string(),
                message: "viewer buffer must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: sensorhub_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Minimum duplicate-suppression window in seconds.
pub const MIN_DEDUP_TTL: u64 = 1;
/// Maximum duplicate-suppression window in seconds (1 hour).
pub const MAX_DEDUP_TTL: u64 = 3600;

/// Gateway ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Separate listener for gateways posting to `/data`.
    ///
    /// When unset, gateways post to the main server.
    pub bind: Option<String>,
    /// How long a `(sensor, timestamp)` pair is treated as a duplicate.
    pub dedup_ttl_secs: u64,
    /// How often expired duplicate keys are evicted.
    pub sweep_interval_secs: u64,
    /// Item types to accept (case-insensitive). Empty accepts any type.
    pub accepted_types: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: None,
            dedup_ttl_secs: 30,
            sweep_interval_secs: 10,
            accepted_types: vec![MST01.to_string()],
        }
    }
}

impl IngestConfig {
    /// Validate ingestion configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(bind) = &self.bind {
            errors.extend(validate_bind("ingest.bind", bind));
        }

        if !(MIN_DEDUP_TTL..=MAX_DEDUP_TTL).contains(&self.dedup_ttl_secs) {
            errors.push(ValidationError {
                field: "ingest.dedup_ttl_secs".to_string(),
                message: format!(
                    "dedup TTL {} is out of range ({}-{} seconds)",
                    self.dedup_ttl_secs, MIN_DEDUP_TTL, MAX_DEDUP_TTL
                ),
            });
        }

        if self.sweep_interval_secs == 0 {
            errors.push(ValidationError {
                field: "ingest.sweep_interval_secs".to_string(),
                message: "sweep interval must be at least 1 second".to_string(),
            });
        }

        if self.accepted_types.iter().any(|t| t.trim().is_empty()) {
            errors.push(ValidationError {
                field: "ingest.accepted_types".to_string(),
                message: "item types cannot be empty strings".to_string(),
            });
        }

        errors
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Minimum scheduled aggregation interval in seconds.
pub const MIN_AGGREGATION_INTERVAL: u64 = 10;

/// Scheduled aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Run bulk checkpoint aggregation this often. Disabled when unset.
    pub interval_secs: Option<u64>,
    /// Window label written by scheduled runs.
    pub label: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            label: crate::aggregator::CHECKPOINT_LABEL.to_string(),
        }
    }
}

impl AggregationConfig {
    /// Validate aggregation configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(interval) = self.interval_secs
            && interval < MIN_AGGREGATION_INTERVAL
        {
            errors.push(ValidationError {
                field: "aggregation.interval_secs".to_string(),
                message: format!(
                    "interval {} is too short (minimum {} seconds)",
                    interval, MIN_AGGREGATION_INTERVAL
                ),
            });
        }

        if self.label.trim().is_empty() {
            errors.push(ValidationError {
                field: "aggregation.label".to_string(),
                message: "label cannot be empty".to_string(),
            });
        }

        errors
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `ingest.dedup_ttl_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensorhub")
        .join("server.toml")
}
