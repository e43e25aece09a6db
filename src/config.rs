//! Environment-driven configuration for ZeroRAG.
//!
//! This module loads and validates settings once at startup (via [`init_config`])
//! and exposes a global, read-only view through [`get_config`]. Every field in
//! `spec.md` §4.1 is represented; invalid combinations are flagged early with
//! descriptive errors so misconfiguration is easy to diagnose.
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ZeroRAG server. Immutable after [`init_config`].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Collection vector dimension; must match the configured embedder.
    pub embedding_dim: usize,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks, in characters. Must be `< chunk_size`.
    pub chunk_overlap: usize,
    /// Upload rejection threshold, in bytes.
    pub max_file_size: u64,
    /// Allowed file extensions (lower-case, no leading dot).
    pub supported_formats: Vec<String>,
    /// Hard upper bound on chunks per document; excess chunks fail ingestion.
    pub max_chunks_per_document: usize,
    /// Default `top_k` for RAG queries when the caller omits it.
    pub top_k_default: usize,
    /// Default score threshold for RAG queries when the caller omits it.
    pub score_threshold_default: f32,
    /// Default max context length (characters) for RAG queries.
    pub max_context_length_default: usize,
    /// RSS threshold (MB) that triggers light cleanup between batches.
    pub memory_threshold_mb: u64,
    /// RSS threshold (MB) that triggers aggressive cleanup.
    pub memory_critical_threshold_mb: u64,
    /// Interval, in seconds, between GC/compaction ticks.
    pub gc_interval_seconds: u64,
    /// Default batch size for bulk vector store operations.
    pub batch_size: usize,
    /// Per-remote query rate limit, requests per minute.
    pub rate_limit_per_minute: u32,
    /// Per-remote upload rate limit, requests per minute.
    pub upload_rate_limit_per_minute: u32,
    /// Allowed CORS origins (`"*"` permits any).
    pub cors_origins: Vec<String>,
    /// Optional bearer token required on non-health endpoints.
    pub api_key: Option<String>,
    /// Minutes of idle time before the connection reaper closes an SSE stream.
    pub stream_connection_timeout_minutes: u64,
    /// Optional override for the HTTP server port; a free port is chosen if unset.
    pub server_port: Option<u16>,
    /// Number of consecutive transient backend failures before failing over.
    pub backend_failure_threshold: u32,
    /// Default per-query deadline, in seconds.
    pub query_timeout_seconds: u64,
    /// Default per-upload processing deadline, in seconds.
    pub upload_timeout_seconds: u64,
    /// Bounded capacity of the vector store operation queue.
    pub operation_queue_capacity: usize,
    /// Name of the primary collection ensured at startup.
    pub collection_name: String,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let chunk_size = load_usize_with_default("CHUNK_SIZE", 1000)?;
        let chunk_overlap = load_usize_with_default("CHUNK_OVERLAP", 200)?;
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidValue(
                "CHUNK_OVERLAP must be strictly less than CHUNK_SIZE".into(),
            ));
        }

        let top_k_default = load_usize_with_default("TOP_K_DEFAULT", 5)?;
        if !(1..=20).contains(&top_k_default) {
            return Err(ConfigError::InvalidValue(
                "TOP_K_DEFAULT must be between 1 and 20".into(),
            ));
        }

        let score_threshold_default = load_f32_with_default("SCORE_THRESHOLD_DEFAULT", 0.3)?;
        if !(0.0..=1.0).contains(&score_threshold_default) {
            return Err(ConfigError::InvalidValue(
                "SCORE_THRESHOLD_DEFAULT must be between 0.0 and 1.0".into(),
            ));
        }

        let max_context_length_default =
            load_usize_with_default("MAX_CONTEXT_LENGTH_DEFAULT", 4000)?;
        if !(1000..=8000).contains(&max_context_length_default) {
            return Err(ConfigError::InvalidValue(
                "MAX_CONTEXT_LENGTH_DEFAULT must be between 1000 and 8000".into(),
            ));
        }

        let memory_threshold_mb = load_u64_with_default("MEMORY_THRESHOLD_MB", 512)?;
        let memory_critical_threshold_mb =
            load_u64_with_default("MEMORY_CRITICAL_THRESHOLD_MB", 1024)?;
        if memory_critical_threshold_mb <= memory_threshold_mb {
            return Err(ConfigError::InvalidValue(
                "MEMORY_CRITICAL_THRESHOLD_MB must exceed MEMORY_THRESHOLD_MB".into(),
            ));
        }

        let rate_limit_per_minute = load_u32_with_default("RATE_LIMIT_PER_MINUTE", 120)?;
        let upload_rate_limit_per_minute =
            load_u32_with_default("UPLOAD_RATE_LIMIT_PER_MINUTE", 20)?;
        if rate_limit_per_minute == 0 || upload_rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue(
                "rate limits must be at least 1 per minute".into(),
            ));
        }

        let server_port = load_env_optional("SERVER_PORT")
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
            })
            .transpose()?;

        let operation_queue_capacity =
            load_usize_with_default("OPERATION_QUEUE_CAPACITY", 10_000)?;
        if operation_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "OPERATION_QUEUE_CAPACITY must be at least 1".into(),
            ));
        }

        Ok(Self {
            embedding_dim: load_usize_with_default("EMBEDDING_DIM", 384)?,
            chunk_size,
            chunk_overlap,
            max_file_size: load_u64_with_default("MAX_FILE_SIZE", 10 * 1024 * 1024)?,
            supported_formats: load_csv_with_default(
                "SUPPORTED_FORMATS",
                &["txt", "csv", "md", "markdown"],
            ),
            max_chunks_per_document: load_usize_with_default("MAX_CHUNKS_PER_DOCUMENT", 1000)?,
            top_k_default,
            score_threshold_default,
            max_context_length_default,
            memory_threshold_mb,
            memory_critical_threshold_mb,
            gc_interval_seconds: load_u64_with_default("GC_INTERVAL_SECONDS", 300)?,
            batch_size: load_usize_with_default("BATCH_SIZE", 32)?,
            rate_limit_per_minute,
            upload_rate_limit_per_minute,
            cors_origins: load_csv_with_default("CORS_ORIGINS", &["*"]),
            api_key: load_env_optional("API_KEY"),
            stream_connection_timeout_minutes: load_u64_with_default(
                "STREAM_CONNECTION_TIMEOUT_MINUTES",
                30,
            )?,
            server_port,
            backend_failure_threshold: load_u32_with_default("BACKEND_FAILURE_THRESHOLD", 3)?,
            query_timeout_seconds: load_u64_with_default("QUERY_TIMEOUT_SECONDS", 60)?,
            upload_timeout_seconds: load_u64_with_default("UPLOAD_TIMEOUT_SECONDS", 300)?,
            operation_queue_capacity,
            collection_name: load_env_optional("COLLECTION_NAME")
                .unwrap_or_else(|| "zerorag-documents".to_string()),
        })
    }
}

fn load_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_f32_with_default(key: &str, default: f32) -> Result<f32, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_csv_with_default(key: &str, default: &[&str]) -> Vec<String> {
    match load_env_optional(key) {
        Some(value) => value
            .split(',')
            .map(|entry| entry.trim().to_lowercase())
            .filter(|entry| !entry.is_empty())
            .collect(),
        None => default.iter().map(|entry| entry.to_string()).collect(),
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        embedding_dim = config.embedding_dim,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        max_file_size = config.max_file_size,
        top_k_default = config.top_k_default,
        collection_name = %config.collection_name,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        unsafe {
            env::set_var("CHUNK_SIZE", "500");
            env::set_var("CHUNK_OVERLAP", "500");
        }
        let error = Config::from_env().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(_)));
        unsafe {
            env::remove_var("CHUNK_SIZE");
            env::remove_var("CHUNK_OVERLAP");
        }
    }

    #[test]
    fn rejects_top_k_default_out_of_range() {
        unsafe {
            env::set_var("TOP_K_DEFAULT", "25");
        }
        let error = Config::from_env().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(_)));
        unsafe {
            env::remove_var("TOP_K_DEFAULT");
        }
    }

    #[test]
    fn defaults_are_internally_consistent() {
        unsafe {
            env::remove_var("CHUNK_SIZE");
            env::remove_var("CHUNK_OVERLAP");
            env::remove_var("TOP_K_DEFAULT");
        }
        let config = Config::from_env().expect("defaults should validate");
        assert!(config.chunk_overlap < config.chunk_size);
        assert!((1..=20).contains(&config.top_k_default));
    }
}
