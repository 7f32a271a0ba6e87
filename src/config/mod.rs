//! Configuration management for the QA ingestion tool.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::schema;
use crate::types::{Comparison, ExposureUnit, TestType, Tolerance};

pub mod paths;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to the config file (set after loading)
    #[serde(skip)]
    pub path: PathBuf,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Backend connection configuration
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    /// Per-test tolerance overrides, keyed by test type slug
    #[serde(default)]
    pub tolerances: BTreeMap<String, ToleranceOverride>,

    /// Outbox configuration
    #[serde(default)]
    pub spool: SpoolConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when no file exists there.
    pub fn load() -> Result<Self> {
        let config_path = paths::config_file();
        if !config_path.exists() {
            let mut config = Config::default();
            config.path = config_path;
            return Ok(config);
        }
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.path = path.to_path_buf();

        Ok(config)
    }

    /// Parse and validate TOML content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.endpoint.is_empty() {
            return Err(ConfigError::Invalid("backend.endpoint is empty".into()));
        }
        if !self.backend.endpoint.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "backend.endpoint must end with '/': {}",
                self.backend.endpoint
            )));
        }
        if self.backend.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "backend.max_attempts must be at least 1".into(),
            ));
        }
        if self.backend.fetch_timeout_seconds == 0 || self.backend.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("backend timeouts must be positive".into()));
        }
        if !matches!(
            self.agent.log_level.to_lowercase().as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::Invalid(format!(
                "agent.log_level must be error, warn, info, debug or trace, got '{}'",
                self.agent.log_level
            )));
        }

        for (key, over) in &self.tolerances {
            let test: TestType = key
                .parse()
                .map_err(|_| ConfigError::UnknownTestType(key.clone()))?;

            if let Some(value) = over.value {
                if !(value.is_finite() && value > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "tolerances.{}.value must be positive, got {}",
                        key, value
                    )));
                }
            }

            if let Some(operator) = over.operator {
                if schema::schema(test).formula.has_fixed_operator()
                    && operator != Comparison::LessOrEqual
                {
                    return Err(ConfigError::Invalid(format!(
                        "tolerances.{}.operator must be '<=' for linearity tests",
                        key
                    )));
                }
            }
        }

        Ok(())
    }

    /// Effective tolerance: the schema default with any override applied.
    pub fn tolerance_for(&self, test: TestType) -> Tolerance {
        let mut tolerance = schema::schema(test).default_tolerance;
        if let Some(over) = self.tolerances.get(test.slug()) {
            if let Some(value) = over.value {
                tolerance.value = value;
            }
            if let Some(operator) = over.operator {
                tolerance.operator = operator;
            }
        }
        tolerance
    }
}

/// Agent-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifies this workstation in submitted records ("auto" = hostname)
    #[serde(default = "default_workstation_id")]
    pub workstation_id: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_workstation_id() -> String {
    "auto".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workstation_id: default_workstation_id(),
            log_level: default_log_level(),
        }
    }
}

impl AgentConfig {
    /// Resolve "auto" to the machine's hostname.
    pub fn resolved_workstation_id(&self) -> String {
        if self.workstation_id != "auto" {
            return self.workstation_id.clone();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| h.to_lowercase())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend endpoint URL, with trailing slash
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token sent with every request (optional)
    #[serde(default)]
    pub api_token: Option<String>,

    /// Proxy URL (optional)
    #[serde(default)]
    pub proxy: Option<String>,

    /// File fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Save/load request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Attempts per save before the record moves to failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_endpoint() -> String {
    "http://localhost:8080/api/".to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_token: None,
            proxy: None,
            fetch_timeout_seconds: default_fetch_timeout(),
            request_timeout_seconds: default_request_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Parsing and computation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Fail on unrecognized sections and unmapped columns
    #[serde(default)]
    pub strict: bool,

    /// Survey-meter unit assumed when a leakage section names none
    #[serde(default = "default_leakage_unit")]
    pub leakage_unit: ExposureUnit,
}

fn default_leakage_unit() -> ExposureUnit {
    ExposureUnit::MilliRoentgenPerHour
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            strict: false,
            leakage_unit: default_leakage_unit(),
        }
    }
}

/// Partial tolerance; unset parts keep the schema default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToleranceOverride {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub operator: Option<Comparison>,
}

/// Outbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Maximum pending outbox size in MB
    #[serde(default = "default_max_pending_mb")]
    pub max_pending_mb: u64,

    /// Maximum age of outbox items in days
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,

    /// Number of completed items to retain
    #[serde(default = "default_completed_retention")]
    pub completed_retention_count: usize,
}

fn default_max_pending_mb() -> u64 {
    100
}

fn default_max_age_days() -> u64 {
    30
}

fn default_completed_retention() -> usize {
    20
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            max_pending_mb: default_max_pending_mb(),
            max_age_days: default_max_age_days(),
            completed_retention_count: default_completed_retention(),
        }
    }
}
