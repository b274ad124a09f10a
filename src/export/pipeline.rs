// src/export/pipeline.rs
//! Wiring of scheduler, coordinator, queue and transport from one config

use crate::export::compressor::Compressor;
use crate::export::coordinator::{CoordinatorConfig, ExportCoordinator, ExportEvent, ExportSummary};
use crate::export::encoder::LogsEncoder;
use crate::export::queue::ExportQueue;
use crate::export::record::{KeyValue, Record};
use crate::export::scheduler::{BatchScheduler, RecordSink, SchedulerConfig};
use crate::export::storage::{SqliteStorage, StorageAdapter};
use crate::transport::backoff::RetryPolicy;
use crate::transport::client::{HttpClient, HyperHttpClient};
use crate::transport::lifecycle::{Lifecycle, LifecycleState};
use crate::transport::sender::{Transport, TransportConfig};
use crate::utils::config::ExporterConfig;
use crate::utils::errors::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A running export pipeline
pub struct ExportPipeline {
    scheduler: BatchScheduler,
    coordinator: Arc<ExportCoordinator>,
    lifecycle: Lifecycle,
}

impl ExportPipeline {
    /// Pipeline backed by SQLite storage and the hyper client
    pub async fn open(config: &ExporterConfig) -> Result<Self> {
        let storage = Arc::new(SqliteStorage::new(config.storage.clone()).await?);
        let client = Arc::new(HyperHttpClient::new(config.request_timeout()));
        Self::with_components(config, storage, client)
    }

    /// Pipeline over caller-provided storage and HTTP client
    pub fn with_components(
        config: &ExporterConfig,
        storage: Arc<dyn StorageAdapter>,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        config.validate()?;

        let session_id = match &config.session_id {
            Some(id) => id.clone(),
            None => {
                let id = ulid::Ulid::new().to_string();
                warn!("No session id configured, generated {}", id);
                id
            }
        };

        let lifecycle = Lifecycle::new();
        let transport = Arc::new(Transport::new(
            client,
            lifecycle.clone(),
            TransportConfig {
                retry: RetryPolicy {
                    retry_count: config.retry_count,
                    base_interval: config.retry_interval(),
                    max_backoff: config.max_backoff(),
                },
                keepalive_max_bytes: config.keepalive_max_bytes,
            },
        ));

        let queue = Arc::new(ExportQueue::new(storage, config.queue_cap_bytes));
        let resource_attributes = config
            .resource_attributes
            .iter()
            .map(|(key, value)| KeyValue::new(key.as_str(), value.as_str()))
            .collect();
        let encoder = LogsEncoder::new(resource_attributes, &config.scope_name, &config.scope_version);

        let coordinator = Arc::new(ExportCoordinator::new(
            CoordinatorConfig {
                endpoint: config.endpoint.clone(),
                session_id,
                headers: config.headers.clone(),
                max_chunk_size: config.max_chunk_size_bytes,
                durable: config.use_persistent_export_queue,
            },
            encoder,
            Arc::new(Compressor::new(config.compression)),
            Some(queue),
            transport,
        ));

        let scheduler = BatchScheduler::new(
            SchedulerConfig {
                scheduled_delay: config.scheduled_delay(),
                max_queue_size: config.max_queue_size,
            },
            coordinator.clone(),
        );

        info!(
            "Export pipeline ready: endpoint={}, session={}, durable={}",
            config.endpoint,
            coordinator.session_id(),
            config.use_persistent_export_queue
        );

        Ok(Self {
            scheduler,
            coordinator,
            lifecycle,
        })
    }

    pub fn session_id(&self) -> &str {
        self.coordinator.session_id()
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &Arc<ExportCoordinator> {
        &self.coordinator
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.coordinator.subscribe()
    }

    /// Resend requests left over from an earlier run of this session
    pub async fn replay(&self) -> ExportSummary {
        self.coordinator.replay().await
    }

    /// Report a host lifecycle change; leaving `Visible` flushes right away
    pub async fn set_lifecycle(&self, state: LifecycleState) {
        self.lifecycle.set(state);
        if state != LifecycleState::Visible {
            self.scheduler.force_flush().await;
        }
    }

    /// Stop accepting records and flush what is buffered
    pub async fn shutdown(&self) {
        info!("Shutting down export pipeline");
        self.scheduler.shutdown().await;
        self.lifecycle.set(LifecycleState::Terminating);
    }
}

impl RecordSink for ExportPipeline {
    fn on_record(&self, record: Record) -> Result<()> {
        self.scheduler.enqueue(record)
    }
}
