//! Configuration types, built from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::mail::keys::DEFAULT_NAMESPACE;
use crate::pipeline::RetryPolicy;

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    /// `None` when no API key is set; summaries then fail softly.
    pub summary: Option<LlmConfig>,
    /// Domain that registered addresses must belong to.
    pub email_domain: Option<String>,
    /// Directory for the rolling log file, if any.
    pub log_dir: Option<PathBuf>,
}

/// Where blobs and records live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub object_root: PathBuf,
    /// Prefix of every canonical object key.
    pub namespace: String,
    /// Keep a `.original` copy of each received document.
    pub keep_original_copy: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/email-catcher.db"),
            object_root: PathBuf::from("./data/objects"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            keep_original_copy: false,
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stage_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or(&get, "EMAIL_CATCHER_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let defaults = StorageConfig::default();
        let storage = StorageConfig {
            db_path: get("EMAIL_CATCHER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            object_root: get("EMAIL_CATCHER_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.object_root),
            namespace: get("EMAIL_CATCHER_NAMESPACE").unwrap_or(defaults.namespace),
            keep_original_copy: parse_bool(&get, "EMAIL_CATCHER_KEEP_ORIGINAL", false)?,
        };

        let retry_defaults = RetryPolicy::default();
        let max_attempts: u32 = parse_or(
            &get,
            "EMAIL_CATCHER_RETRY_MAX_ATTEMPTS",
            retry_defaults.max_attempts,
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_CATCHER_RETRY_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let backoff_rate: f64 = parse_or(
            &get,
            "EMAIL_CATCHER_RETRY_BACKOFF_RATE",
            retry_defaults.backoff_rate,
        )?;
        if !backoff_rate.is_finite() || backoff_rate < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_CATCHER_RETRY_BACKOFF_RATE".to_string(),
                message: "must be a finite number >= 1.0".to_string(),
            });
        }
        let interval_ms: u64 = parse_or(
            &get,
            "EMAIL_CATCHER_RETRY_INTERVAL_MS",
            retry_defaults.initial_interval.as_millis() as u64,
        )?;
        let timeout_secs: u64 = parse_or(&get, "EMAIL_CATCHER_STAGE_TIMEOUT_SECS", 120)?;

        let pipeline = PipelineConfig {
            stage_timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy {
                max_attempts,
                initial_interval: Duration::from_millis(interval_ms),
                backoff_rate,
            },
        };

        let backend = match get("SUMMARY_LLM_BACKEND") {
            Some(name) => LlmBackend::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
                key: "SUMMARY_LLM_BACKEND".to_string(),
                message: format!("unknown backend '{name}' (expected anthropic or openai)"),
            })?,
            None => LlmBackend::Anthropic,
        };
        let summary = get(backend.api_key_var()).map(|key| LlmConfig {
            backend,
            api_key: SecretString::from(key),
            model: get("SUMMARY_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
        });

        Ok(Self {
            bind_addr,
            storage,
            pipeline,
            summary,
            email_domain: get("EMAIL_DOMAIN").map(|d| d.trim().to_lowercase()),
            log_dir: get("EMAIL_CATCHER_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{v}' is not a boolean"),
        }),
        None => Ok(default),
    }
}
