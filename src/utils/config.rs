// src/utils/config.rs
//! Exporter configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `logship.{toml,yaml,json}` file (or the file named by `LOGSHIP_CONFIG`),
//! then `LOGSHIP__*` environment variables
//! (e.g. `LOGSHIP__RETRY_COUNT=5`, `LOGSHIP__STORAGE__BASE_DIR=/var/lib/logship`).

use crate::export::compressor::ContentEncoding;
use crate::export::storage::StorageConfig;
use crate::utils::errors::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default persisted queue cap (2 MiB)
pub const DEFAULT_QUEUE_CAP_BYTES: usize = 2 * 1024 * 1024;

/// Default keepalive payload ceiling (64 KiB)
pub const DEFAULT_KEEPALIVE_MAX_BYTES: usize = 64 * 1024;

/// Full exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Collector endpoint (OTLP/HTTP logs)
    pub endpoint: String,

    /// Session id stamped on every request; generated at startup when unset
    pub session_id: Option<String>,

    /// Delay between the first buffered record and the scheduled flush
    pub scheduled_delay_millis: u64,

    /// Upper bound for one wire document before chunking kicks in
    pub max_chunk_size_bytes: usize,

    /// Persist requests before sending so they survive process death
    pub use_persistent_export_queue: bool,

    /// Retry budget for connection failures
    pub retry_count: u32,

    /// Base backoff interval
    pub retry_interval_millis: u64,

    /// Ceiling for a single backoff wait
    pub max_backoff_millis: u64,

    /// Largest payload eligible for a keepalive send while hidden
    pub keepalive_max_bytes: usize,

    /// Total serialized size cap of the persisted queue
    pub queue_cap_bytes: usize,

    /// In-memory record buffer bound
    pub max_queue_size: usize,

    /// Per-request I/O timeout
    pub request_timeout_millis: u64,

    /// Content encoding for request bodies
    pub compression: ContentEncoding,

    /// Extra request headers
    pub headers: BTreeMap<String, String>,

    /// Resource attributes attached to every payload
    pub resource_attributes: BTreeMap<String, String>,

    /// Instrumentation scope name
    pub scope_name: String,

    /// Instrumentation scope version
    pub scope_version: String,

    /// Durable queue storage
    pub storage: StorageConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        let mut resource_attributes = BTreeMap::new();
        resource_attributes.insert("service.name".to_string(), "logship".to_string());

        Self {
            endpoint: "http://127.0.0.1:4318/v1/logs".to_string(),
            session_id: None,
            scheduled_delay_millis: 5000,
            max_chunk_size_bytes: 950_000,
            use_persistent_export_queue: true,
            retry_count: 100,
            retry_interval_millis: 1000,
            max_backoff_millis: 60_000,
            keepalive_max_bytes: DEFAULT_KEEPALIVE_MAX_BYTES,
            queue_cap_bytes: DEFAULT_QUEUE_CAP_BYTES,
            max_queue_size: 100_000,
            request_timeout_millis: 30_000,
            compression: ContentEncoding::Gzip,
            headers: BTreeMap::new(),
            resource_attributes,
            scope_name: "logship".to_string(),
            scope_version: crate::VERSION.to_string(),
            storage: StorageConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("LOGSHIP_CONFIG").unwrap_or_else(|_| "logship".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                config::Environment::with_prefix("LOGSHIP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ExporterError::Config(format!("Failed to read configuration: {}", e)))?;

        let config: ExporterConfig = settings
            .try_deserialize()
            .map_err(|e| ExporterError::Config(format!("Failed to parse configuration: {}", e)))?;

        config.validate()?;
        debug!("Loaded configuration from '{}' and environment", file);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(ExporterError::Config("endpoint cannot be empty".to_string()));
        }
        // The pooled client speaks plain HTTP; terminate TLS at a local collector
        if !self.endpoint.starts_with("http://") {
            return Err(ExporterError::Config(format!(
                "endpoint must be an http:// URL, got '{}'",
                self.endpoint
            )));
        }
        if self.max_chunk_size_bytes == 0 {
            return Err(ExporterError::Config(
                "max_chunk_size_bytes must be at least 1".to_string(),
            ));
        }
        if self.retry_interval_millis == 0 {
            return Err(ExporterError::Config(
                "retry_interval_millis must be at least 1".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(ExporterError::Config("max_queue_size cannot be 0".to_string()));
        }
        if self.queue_cap_bytes == 0 {
            return Err(ExporterError::Config("queue_cap_bytes cannot be 0".to_string()));
        }

        Ok(())
    }

    pub fn scheduled_delay(&self) -> Duration {
        Duration::from_millis(self.scheduled_delay_millis)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_millis)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_millis)
    }
}
