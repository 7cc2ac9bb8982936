//! Configuration loading for vecguard.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Config file lives at ~/.config/vecguard/config.{toml,yaml,json}.
//! Environment variables use `VECGUARD_<SECTION>__<FIELD>`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::context::{Language, ProjectId};
use crate::error::IsolationError;

/// Vector distance metric of the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    #[default]
    Cosine,
    Euclid,
    Dot,
    Manhattan,
}

impl Distance {
    /// Name used by the engine's REST API.
    pub fn engine_name(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Euclid => "Euclid",
            Self::Dot => "Dot",
            Self::Manhattan => "Manhattan",
        }
    }

    pub fn from_engine_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "euclid" => Some(Self::Euclid),
            "dot" => Some(Self::Dot),
            "manhattan" => Some(Self::Manhattan),
            _ => None,
        }
    }
}

/// Index engine connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_engine_url")]
    pub url: String,

    /// API key (usually from VECGUARD_ENGINE__API_KEY, not the config file)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Transport timeout for a single HTTP request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum concurrent engine calls.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Maximum time a call waits for a free pool slot.
    #[serde(default = "default_pool_wait_ms")]
    pub pool_wait_ms: u64,
}

fn default_engine_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_pool_size() -> usize {
    32
}

fn default_pool_wait_ms() -> u64 {
    1_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            api_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            pool_size: default_pool_size(),
            pool_wait_ms: default_pool_wait_ms(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!("engine.url must be an http(s) URL, got {}", self.url));
        }
        if self.pool_size == 0 {
            return Err("engine.pool_size must be > 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("engine.request_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Collection parameters. Changing these on an existing collection
/// requires a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSettings {
    #[serde(default = "default_collection_name")]
    pub name: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub distance: Distance,
}

fn default_collection_name() -> String {
    "vector_memory".to_string()
}

fn default_dimension() -> usize {
    1536
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
            dimension: default_dimension(),
            distance: Distance::default(),
        }
    }
}

/// Search limits and timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Limit used when the caller passes 0.
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Hard timeout for one search, including retries.
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_search_limit() -> usize {
    10
}

fn default_max_limit() -> usize {
    50
}

fn default_search_timeout_ms() -> u64 {
    5_000
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            max_limit: default_max_limit(),
            timeout_ms: default_search_timeout_ms(),
        }
    }
}

/// Upsert batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout for one attempt at one batch.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_batches() -> usize {
    4
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            max_concurrent_batches: default_max_concurrent_batches(),
        }
    }
}

/// Retry and circuit-breaker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl ResilienceSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("resilience.max_attempts must be > 0".to_string());
        }
        if self.failure_threshold == 0 {
            return Err("resilience.failure_threshold must be > 0".to_string());
        }
        if self.multiplier < 1.0 {
            return Err(format!(
                "resilience.multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("resilience.initial_backoff_ms must not exceed max_backoff_ms".to_string());
        }
        Ok(())
    }
}

/// Background health monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// 6-field cron expression (with seconds).
    #[serde(default = "default_health_cron")]
    pub cron: String,

    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,

    #[serde(default = "default_metrics_cron")]
    pub metrics_cron: String,
}

fn default_health_cron() -> String {
    "*/30 * * * * *".to_string()
}

fn default_check_timeout_ms() -> u64 {
    2_000
}

fn default_metrics_cron() -> String {
    "0 * * * * *".to_string()
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            cron: default_health_cron(),
            check_timeout_ms: default_check_timeout_ms(),
            metrics_cron: default_metrics_cron(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub collection: CollectionSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub ingest: IngestSettings,

    #[serde(default)]
    pub resilience: ResilienceSettings,

    #[serde(default)]
    pub health: HealthSettings,

    /// Static project -> language directory
    #[serde(default)]
    pub projects: BTreeMap<String, String>,

    /// gRPC health endpoint port
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    #[serde(default = "default_grpc_host")]
    pub grpc_host: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_grpc_port() -> u16 {
    50061
}

fn default_grpc_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            collection: CollectionSettings::default(),
            search: SearchSettings::default(),
            ingest: IngestSettings::default(),
            resilience: ResilienceSettings::default(),
            health: HealthSettings::default(),
            projects: BTreeMap::new(),
            grpc_port: default_grpc_port(),
            grpc_host: default_grpc_host(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/vecguard/config.*)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (VECGUARD_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, IsolationError> {
        let config_dir = ProjectDirs::from("", "", "vecguard")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("grpc_port", default_grpc_port() as i64)
            .map_err(|e| IsolationError::Config(e.to_string()))?
            .set_default("grpc_host", default_grpc_host())
            .map_err(|e| IsolationError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| IsolationError::Config(e.to_string()))?
            .set_default("engine.url", default_engine_url())
            .map_err(|e| IsolationError::Config(e.to_string()))?
            .set_default("collection.name", default_collection_name())
            .map_err(|e| IsolationError::Config(e.to_string()))?
            .set_default("collection.dimension", default_dimension() as i64)
            .map_err(|e| IsolationError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: VECGUARD_ENGINE__URL, VECGUARD_SEARCH__TIMEOUT_MS, VECGUARD_GRPC_PORT
        builder = builder.add_source(
            Environment::with_prefix("VECGUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| IsolationError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| IsolationError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), IsolationError> {
        self.engine.validate().map_err(IsolationError::Config)?;
        self.resilience.validate().map_err(IsolationError::Config)?;

        if self.collection.name.trim().is_empty() {
            return Err(IsolationError::Config(
                "collection.name must not be empty".to_string(),
            ));
        }
        if self.collection.dimension == 0 {
            return Err(IsolationError::Config(
                "collection.dimension must be > 0".to_string(),
            ));
        }
        if self.search.default_limit == 0 || self.search.max_limit < self.search.default_limit {
            return Err(IsolationError::Config(format!(
                "search limits must satisfy 0 < default_limit ({}) <= max_limit ({})",
                self.search.default_limit, self.search.max_limit
            )));
        }
        if self.search.timeout_ms == 0 {
            return Err(IsolationError::Config(
                "search.timeout_ms must be > 0".to_string(),
            ));
        }
        if self.ingest.batch_size == 0 || self.ingest.max_concurrent_batches == 0 {
            return Err(IsolationError::Config(
                "ingest.batch_size and ingest.max_concurrent_batches must be > 0".to_string(),
            ));
        }
        for (project, language) in &self.projects {
            ProjectId::parse(project)
                .and_then(|_| Language::parse(language))
                .map_err(|e| IsolationError::Config(format!("projects.{project}: {e}")))?;
        }
        Ok(())
    }

    /// Get the socket address for the gRPC server
    pub fn grpc_addr(&self) -> String {
        format!("{}:{}", self.grpc_host, self.grpc_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.collection.dimension, 1536);
        assert_eq!(settings.collection.distance, Distance::Cosine);
        assert_eq!(settings.search.max_limit, 50);
        assert_eq!(settings.search.timeout_ms, 5_000);
        assert_eq!(settings.ingest.batch_size, 100);
        assert_eq!(settings.resilience.max_attempts, 3);
        assert_eq!(settings.resilience.failure_threshold, 5);
        assert_eq!(settings.health.cron, "*/30 * * * * *");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_grpc_addr() {
        let settings = Settings::default();
        assert_eq!(settings.grpc_addr(), "0.0.0.0:50061");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[collection]
name = "docs"
dimension = 768
distance = "dot"

[search]
max_limit = 20

[projects]
acme = "en"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(settings.collection.name, "docs");
        assert_eq!(settings.collection.dimension, 768);
        assert_eq!(settings.collection.distance, Distance::Dot);
        assert_eq!(settings.search.max_limit, 20);
        assert_eq!(settings.search.default_limit, 10);
        assert_eq!(settings.projects.get("acme").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut settings = Settings::default();
        settings.search.max_limit = 5;
        let err = settings.validate().unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_validate_rejects_bad_project_language() {
        let mut settings = Settings::default();
        settings.projects.insert("acme".into(), "english".into());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_resilience_validation() {
        let mut config = ResilienceSettings::default();
        assert!(config.validate().is_ok());

        config.multiplier = 0.5;
        assert!(config.validate().is_err());

        config.multiplier = 2.0;
        config.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_distance_engine_names() {
        assert_eq!(Distance::Cosine.engine_name(), "Cosine");
        assert_eq!(Distance::from_engine_name("Euclid"), Some(Distance::Euclid));
        assert_eq!(Distance::from_engine_name("hamming"), None);
    }
}
