// src/lib.rs
//! Logship Telemetry Export Engine Library
//!
//! Delivers telemetry records to an OTLP/HTTP collector from a process that
//! may be backgrounded or killed at any moment, losing as little as possible
//! without flooding the collector during outages.
//!
//! # Architecture
//!
//! - **export**: batching, OTLP/JSON encoding, compression, durable queue
//! - **transport**: retrying HTTP sender with per-URL superseding
//! - **observability**: tracing and Prometheus metrics setup
//! - **utils**: configuration and errors

// Public module exports
pub mod export;
pub mod observability;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use export::coordinator::{ExportCoordinator, ExportEvent};
pub use export::pipeline::ExportPipeline;
pub use export::record::{AnyValue, KeyValue, Record};
pub use export::scheduler::RecordSink;
pub use transport::lifecycle::{Lifecycle, LifecycleState};
pub use utils::config::ExporterConfig;
pub use utils::errors::{ExporterError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
