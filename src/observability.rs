// src/observability.rs
//! Logging and metrics setup
//!
//! - `RUST_LOG` selects levels (default `info`)
//! - `LOGSHIP_LOG_FORMAT=json` switches to JSON lines
//! - `LOGSHIP_METRICS_ADDR` (e.g. `0.0.0.0:9464`) serves Prometheus metrics over HTTP;
//!   without it the recorder is installed and `render_metrics` gives the text form

use crate::utils::errors::{ExporterError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global tracing subscriber
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOGSHIP_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| ExporterError::Config(format!("Failed to install tracing: {}", e)))
}

/// Install the Prometheus metrics recorder
pub fn init_metrics() -> Result<()> {
    match std::env::var("LOGSHIP_METRICS_ADDR") {
        Ok(addr) => {
            let addr: SocketAddr = addr.parse().map_err(|e| {
                ExporterError::Config(format!("Invalid LOGSHIP_METRICS_ADDR '{}': {}", addr, e))
            })?;

            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|e| ExporterError::Config(format!("Failed to start metrics exporter: {}", e)))?;

            tracing::info!("Serving metrics on http://{}/metrics", addr);
        }
        Err(_) => {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| ExporterError::Config(format!("Failed to install metrics recorder: {}", e)))?;

            let _ = PROMETHEUS.set(handle);
        }
    }

    Ok(())
}

/// Current metrics in Prometheus text format, when the in-process recorder is installed
pub fn render_metrics() -> Option<String> {
    PROMETHEUS.get().map(|handle| handle.render())
}
