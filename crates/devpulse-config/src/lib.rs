//! Configuration loading, validation, and merging for devpulse.
//!
//! Provides [`DevpulseConfig`] — the top-level runtime settings named in
//! spec §6 — together with helpers for loading from TOML files, applying
//! environment overrides, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `pipeline.max_concurrency` is unusually large.
    LargePipelineConcurrency {
        /// The configured value.
        value: usize,
    },
    /// Summaries are enabled but no api key was supplied.
    SummaryEnabledWithoutApiKey,
    /// `s3.endpoint` was set without `s3.force_path_style`, which is almost
    /// always wrong for S3-compatible (non-AWS) endpoints.
    CustomEndpointWithoutPathStyle,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LargePipelineConcurrency { value } => {
                write!(f, "pipeline.max_concurrency is unusually large ({value})")
            }
            Self::SummaryEnabledWithoutApiKey => {
                write!(f, "summary.enabled is true but summary.api_key is unset")
            }
            Self::CustomEndpointWithoutPathStyle => {
                write!(f, "s3.endpoint is set but s3.force_path_style is not")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for devpulse (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DevpulseConfig {
    /// Postgres DSN.
    pub database_url: String,
    /// Durable-log store DSN (Redis or equivalent).
    pub redis_url: String,
    /// Shared bearer token required on all non-health HTTP routes and the
    /// WebSocket upgrade.
    pub api_key: String,
    /// Object store configuration.
    #[serde(default)]
    pub s3: S3Config,
    /// Summary-generation collaborator configuration.
    #[serde(default)]
    pub summary: SummaryConfig,
    /// WebSocket keepalive configuration.
    #[serde(default)]
    pub ws: WsConfig,
    /// Post-processing pipeline configuration.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Object store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct S3Config {
    /// Bucket name.
    #[serde(default)]
    pub bucket: String,
    /// Region.
    #[serde(default)]
    pub region: String,
    /// Custom endpoint, for S3-compatible stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Force path-style addressing (required by most non-AWS endpoints).
    #[serde(default)]
    pub force_path_style: bool,
}

/// Summary-generation collaborator configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SummaryConfig {
    /// Whether summarization runs at all (spec §4.F step 5).
    #[serde(default)]
    pub enabled: bool,
    /// Model identifier to request.
    #[serde(default = "default_summary_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Max output tokens for the summary response.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// API key for the summary collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL of the summary-generation collaborator. Only meaningful
    /// when `enabled` is true; left blank otherwise.
    #[serde(default)]
    pub base_url: String,
}

fn default_summary_model() -> String {
    "default".to_string()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    512
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_summary_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            api_key: None,
            base_url: String::new(),
        }
    }
}

/// WebSocket keepalive configuration (spec §4.G, §6).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WsConfig {
    /// Interval between keepalive pings.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Grace period after a missed pong before disconnecting.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
}

fn default_ping_interval_ms() -> u64 {
    60_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
        }
    }
}

/// Post-processing pipeline configuration (spec §4.F, §6).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PipelineConfig {
    /// Maximum number of concurrently running pipeline jobs.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Bounded queue capacity; submissions beyond this are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Threshold above which `pipeline.max_concurrency` generates a warning.
const LARGE_CONCURRENCY_THRESHOLD: usize = 256;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`DevpulseConfig`] from a TOML file path, then apply environment
/// overrides.
pub fn load_config(path: &Path) -> Result<DevpulseConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    let mut config = parse_toml(&content)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`DevpulseConfig`].
pub fn parse_toml(content: &str) -> Result<DevpulseConfig, ConfigError> {
    toml::from_str::<DevpulseConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables: `DATABASE_URL`, `REDIS_URL`, `DEVPULSE_API_KEY`,
/// `DEVPULSE_SUMMARY_API_KEY`.
pub fn apply_env_overrides(config: &mut DevpulseConfig) {
    if let Ok(val) = std::env::var("DATABASE_URL") {
        config.database_url = val;
    }
    if let Ok(val) = std::env::var("REDIS_URL") {
        config.redis_url = val;
    }
    if let Ok(val) = std::env::var("DEVPULSE_API_KEY") {
        config.api_key = val;
    }
    if let Ok(val) = std::env::var("DEVPULSE_SUMMARY_API_KEY") {
        config.summary.api_key = Some(val);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (missing bearer token, empty DSNs) come back as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &DevpulseConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.api_key.trim().is_empty() {
        errors.push("api_key must not be empty".into());
    }
    if config.database_url.trim().is_empty() {
        errors.push("database_url must not be empty".into());
    }
    if config.redis_url.trim().is_empty() {
        errors.push("redis_url must not be empty".into());
    }
    if config.pipeline.max_concurrency == 0 {
        errors.push("pipeline.max_concurrency must be at least 1".into());
    }
    if config.pipeline.queue_capacity == 0 {
        errors.push("pipeline.queue_capacity must be at least 1".into());
    }

    if config.pipeline.max_concurrency > LARGE_CONCURRENCY_THRESHOLD {
        warnings.push(ConfigWarning::LargePipelineConcurrency {
            value: config.pipeline.max_concurrency,
        });
    }
    if config.summary.enabled && config.summary.api_key.is_none() {
        warnings.push(ConfigWarning::SummaryEnabledWithoutApiKey);
    }
    if config.s3.endpoint.is_some() && !config.s3.force_path_style {
        warnings.push(ConfigWarning::CustomEndpointWithoutPathStyle);
    }

    if !errors.is_empty() {
        return Err(ConfigError::ValidationError { reasons: errors });
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        database_url = "postgres://localhost/devpulse"
        redis_url = "redis://localhost"
        api_key = "secret"
        "#
    }

    #[test]
    fn parses_minimal_config_with_defaults_filled_in() {
        let config = parse_toml(minimal_toml()).unwrap();
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert_eq!(config.ws.ping_interval_ms, 60_000);
        assert!(!config.summary.enabled);
    }

    #[test]
    fn validate_rejects_empty_api_key() {
        let mut config = parse_toml(minimal_toml()).unwrap();
        config.api_key.clear();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validate_warns_on_summary_enabled_without_api_key() {
        let mut config = parse_toml(minimal_toml()).unwrap();
        config.summary.enabled = true;
        let warnings = validate_config(&config).unwrap();
        assert!(warnings.contains(&ConfigWarning::SummaryEnabledWithoutApiKey));
    }

    #[test]
    #[allow(unsafe_code)]
    fn env_override_replaces_api_key() {
        let mut config = parse_toml(minimal_toml()).unwrap();
        // SAFETY: test runs single-threaded w.r.t. this env var.
        unsafe {
            std::env::set_var("DEVPULSE_API_KEY", "from-env");
        }
        apply_env_overrides(&mut config);
        unsafe {
            std::env::remove_var("DEVPULSE_API_KEY");
        }
        assert_eq!(config.api_key, "from-env");
    }
}
