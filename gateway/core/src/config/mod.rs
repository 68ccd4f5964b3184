//! TOML Configuration File Support
//!
//! One typed [`GatewayConfig`] covering every component, loaded from
//! `$XDG_CONFIG_HOME/llm-gateway/gateway.toml` (typically
//! `~/.config/llm-gateway/gateway.toml`).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. Environment variables (`GATEWAY_*`, `OLLAMA_HOST`, `OLLAMA_PORT`)
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [dispatcher]
//! gate_capacity = 4
//! call_timeout_ms = 120000
//!
//! [backend]
//! host = "localhost"
//! port = 11434
//!
//! [cache]
//! local_capacity = 1000
//! inference_ttl_secs = 1800
//! shared_url = "redis://127.0.0.1:6379"
//!
//! [quotas.free]
//! max_concurrent = 2
//! per_minute = 20
//!
//! [timeouts]
//! critical_secs = 30
//! background_secs = 600
//!
//! [routing]
//! memory_safety_margin = 0.8
//!
//! [[models]]
//! name = "llama3.2:1b"
//! capability = "fast-response"
//! memory_mb = 1300
//! target_latency_ms = 3000
//! quality = 0.55
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheConfig, MAX_TTL};
use crate::dispatcher::{DispatcherConfig, EnrichmentConfig};
use crate::monitor::MonitorConfig;
use crate::prioritizer::{PrioritizerConfig, QuotaTable, TimeoutTable};
use crate::routing::{default_catalog, ModelDescriptor, RouterConfig};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Highest-priority source that contributed to a configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Default values only
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Configuration Structures
// =============================================================================

/// Inference backend location
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            request_timeout_ms: 120_000,
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Complete gateway configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub dispatcher: DispatcherConfig,
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub quotas: QuotaTable,
    pub timeouts: TimeoutTable,
    pub routing: RouterConfig,
    pub enrichment: EnrichmentConfig,
    pub monitor: MonitorConfig,
    /// Model catalog
    pub models: Vec<ModelDescriptor>,

    /// Path to the config file that was loaded (if any)
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,

    #[serde(skip)]
    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            backend: BackendConfig::default(),
            cache: CacheConfig::default(),
            quotas: QuotaTable::default(),
            timeouts: TimeoutTable::default(),
            routing: RouterConfig::default(),
            enrichment: EnrichmentConfig::default(),
            monitor: MonitorConfig::default(),
            models: default_catalog(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Prioritizer settings assembled from the quota and timeout sections
    #[must_use]
    pub fn prioritizer_config(&self) -> PrioritizerConfig {
        PrioritizerConfig {
            quotas: self.quotas.clone(),
            timeouts: self.timeouts.clone(),
            ..PrioritizerConfig::default()
        }
    }

    /// Router settings with the dispatcher's per-call timeout applied
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            call_timeout_ms: self.dispatcher.call_timeout_ms,
            ..self.routing.clone()
        }
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.dispatcher.gate_capacity == 0 {
            return invalid("dispatcher.gate_capacity must be at least 1".into());
        }
        if self.dispatcher.max_prompt_chars == 0 {
            return invalid("dispatcher.max_prompt_chars must be at least 1".into());
        }
        if self.backend.port == 0 {
            return invalid("backend.port must be non-zero".into());
        }
        if self.cache.local_capacity == 0 {
            return invalid("cache.local_capacity must be at least 1".into());
        }
        let max_ttl = MAX_TTL.as_secs();
        for (name, secs) in [
            ("inference_ttl_secs", self.cache.inference_ttl_secs),
            ("retrieval_ttl_secs", self.cache.retrieval_ttl_secs),
            ("embedding_ttl_secs", self.cache.embedding_ttl_secs),
        ] {
            if !(1..=max_ttl).contains(&secs) {
                return invalid(format!("cache.{name} {secs} is outside [1, {max_ttl}]"));
            }
        }

        let routing = &self.routing;
        if !(routing.ema_alpha > 0.0 && routing.ema_alpha <= 1.0) {
            return invalid(format!("routing.ema_alpha {} is outside (0, 1]", routing.ema_alpha));
        }
        if !(routing.memory_safety_margin > 0.0 && routing.memory_safety_margin <= 1.0) {
            return invalid(format!(
                "routing.memory_safety_margin {} is outside (0, 1]",
                routing.memory_safety_margin
            ));
        }
        if !(routing.cpu_ceiling_percent > 0.0 && routing.cpu_ceiling_percent <= 100.0) {
            return invalid(format!(
                "routing.cpu_ceiling_percent {} is outside (0, 100]",
                routing.cpu_ceiling_percent
            ));
        }
        if !routing.complexity.is_ordered() {
            return invalid("routing.complexity thresholds must strictly increase".into());
        }
        if !self.timeouts.is_monotonic() {
            return invalid("timeouts must not shrink as priority decreases".into());
        }

        if self.models.is_empty() {
            return invalid("models: the catalog is empty".into());
        }
        let mut seen = HashSet::new();
        for model in &self.models {
            if !seen.insert(model.name.as_str()) {
                return invalid(format!("models: duplicate entry {}", model.name));
            }
            if !(0.0..=1.0).contains(&model.quality) {
                return invalid(format!("models: {} quality {} is outside [0, 1]", model.name, model.quality));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/llm-gateway/gateway.toml` or
/// `~/.config/llm-gateway/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llm-gateway").join("gateway.toml"))
}

/// Load configuration from the default path, defaults and environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            config = toml::from_str(&toml_content)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    Ok(config)
}

/// Apply environment variable overrides
pub fn apply_env_config(config: &mut GatewayConfig) {
    apply_env_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from any variable lookup
pub fn apply_env_from<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
                None
            }
        }
    }

    let mut applied = false;

    if let Some(host) = lookup("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
        config.backend.host = host;
        applied = true;
    }
    if let Some(port) = parsed(&lookup, "OLLAMA_PORT") {
        config.backend.port = port;
        applied = true;
    }
    if let Some(capacity) = parsed(&lookup, "GATEWAY_GATE_CAPACITY") {
        config.dispatcher.gate_capacity = capacity;
        applied = true;
    }
    if let Some(max) = parsed(&lookup, "GATEWAY_MAX_PROMPT_CHARS") {
        config.dispatcher.max_prompt_chars = max;
        applied = true;
    }
    if let Some(ms) = parsed(&lookup, "GATEWAY_CALL_TIMEOUT_MS") {
        config.dispatcher.call_timeout_ms = ms;
        applied = true;
    }
    if let Some(capacity) = parsed(&lookup, "GATEWAY_CACHE_CAPACITY") {
        config.cache.local_capacity = capacity;
        applied = true;
    }
    if let Some(secs) = parsed(&lookup, "GATEWAY_INFERENCE_TTL_SECS") {
        config.cache.inference_ttl_secs = secs;
        applied = true;
    }
    if let Some(namespace) = lookup("GATEWAY_CACHE_NAMESPACE").filter(|n| !n.trim().is_empty()) {
        config.cache.namespace = namespace;
        applied = true;
    }
    if let Some(url) = lookup("GATEWAY_CACHE_SHARED_URL").filter(|u| !u.trim().is_empty()) {
        config.cache.shared_url = Some(url);
        applied = true;
    }
    if let Some(top_k) = parsed(&lookup, "GATEWAY_ENRICHMENT_TOP_K") {
        config.enrichment.top_k = top_k;
        applied = true;
    }

    if applied {
        config.source = ConfigSource::Env;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.dispatcher.gate_capacity, 4);
        assert_eq!(config.backend.port, 11434);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            load_config_from_path(Some(PathBuf::from("/nonexistent/gateway.toml"))).unwrap();
        assert!(config.config_file_path.is_none());
        assert_eq!(config.models, default_catalog());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[dispatcher]
gate_capacity = 8

[quotas.free]
max_concurrent = 1
per_minute = 5

[[models]]
name = "only"
capability = "high-quality"
memory_mb = 2048
target_latency_ms = 5000
quality = 0.7
"#
        )
        .unwrap();

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.dispatcher.gate_capacity, 8);
        assert_eq!(config.dispatcher.max_prompt_chars, 32_000);
        assert_eq!(config.quotas.free.per_minute, 5);
        assert_eq!(config.quotas.premium, QuotaTable::default().premium);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].name, "only");
        assert!(config.config_file_path.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[dispatcher\ngate_capacity = ").unwrap();
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        apply_env_from(
            &mut config,
            env(&[
                ("OLLAMA_HOST", "gpu-box"),
                ("OLLAMA_PORT", "9000"),
                ("GATEWAY_GATE_CAPACITY", "2"),
                ("GATEWAY_ENRICHMENT_TOP_K", "not-a-number"),
                ("GATEWAY_CACHE_SHARED_URL", "redis://cache:6379"),
            ]),
        );
        assert_eq!(config.cache.shared_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.backend.host, "gpu-box");
        assert_eq!(config.backend.port, 9000);
        assert_eq!(config.dispatcher.gate_capacity, 2);
        assert_eq!(config.enrichment.top_k, EnrichmentConfig::default().top_k);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_no_env_keeps_source() {
        let mut config = GatewayConfig::default();
        apply_env_from(&mut config, env(&[]));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_validation_failures() {
        let cases: Vec<Box<dyn Fn(&mut GatewayConfig)>> = vec![
            Box::new(|c| c.dispatcher.gate_capacity = 0),
            Box::new(|c| c.models.clear()),
            Box::new(|c| c.routing.ema_alpha = 0.0),
            Box::new(|c| c.routing.memory_safety_margin = 1.5),
            Box::new(|c| c.routing.complexity.complex_chars = 10),
            Box::new(|c| c.timeouts.background_secs = 1),
            Box::new(|c| c.cache.inference_ttl_secs = u64::MAX),
            Box::new(|c| c.cache.embedding_ttl_secs = 0),
            Box::new(|c| {
                let dup = c.models[0].clone();
                c.models.push(dup);
            }),
        ];
        for mutate in cases {
            let mut config = GatewayConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
        }
    }

    #[test]
    fn test_component_configs() {
        let mut config = GatewayConfig::default();
        config.dispatcher.call_timeout_ms = 5_000;
        config.quotas.free.per_minute = 3;
        assert_eq!(config.router_config().call_timeout_ms, 5_000);
        assert_eq!(config.prioritizer_config().quotas.free.per_minute, 3);
    }

    #[test]
    fn test_default_path_location() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("llm-gateway/gateway.toml"));
        }
    }
}
