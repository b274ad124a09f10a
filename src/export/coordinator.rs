// src/export/coordinator.rs
//! Export coordinator
//!
//! Turns a flushed batch into export requests and sees each one through:
//!
//! ```text
//! batch → encode_batches → to_json → compress → ExportRequest
//!                                                    ↓
//!                                     persist (durable mode only)
//!                                                    ↓
//!                                             Transport::send
//!                                                    ↓
//!                                 success: remove from queue, Succeeded
//!                                 failed/aborted: stays queued
//! ```
//!
//! Documents of one batch go out one after another, so a batch never
//! supersedes its own requests.

use crate::export::compressor::Compressor;
use crate::export::encoder::LogsEncoder;
use crate::export::queue::ExportQueue;
use crate::export::record::Record;
use crate::export::request::ExportRequest;
use crate::export::scheduler::BatchSink;
use crate::transport::sender::{SendOptions, SendOutcome, SendReport, Transport};
use crate::utils::errors::{ExporterError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Capacity of the export event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Completion notification for producers and observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    /// Collector accepted the request
    Succeeded {
        request_id: String,
        records: usize,
        attempts: u32,
    },

    /// Retry budget exhausted or terminal status
    Failed {
        request_id: String,
        error: ExporterError,
    },

    /// Superseded, cancelled or abandoned while hidden
    Aborted {
        request_id: String,
        error: ExporterError,
    },

    /// Records that never became a request (encoding or compression failed)
    Dropped {
        records: usize,
        error: ExporterError,
    },
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub endpoint: String,
    pub session_id: String,

    /// Headers sent with every request, besides `Content-Encoding`
    pub headers: BTreeMap<String, String>,

    pub max_chunk_size: usize,

    /// Persist requests before sending
    pub durable: bool,
}

/// Per-batch result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
    pub dropped_records: usize,
}

impl ExportSummary {
    fn record(&mut self, outcome: &SendOutcome) {
        self.requests += 1;
        match outcome {
            SendOutcome::Success => self.succeeded += 1,
            SendOutcome::Aborted(_) => self.aborted += 1,
            SendOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Combine summaries (e.g. replay plus a final flush)
    pub fn combined(mut self, other: ExportSummary) -> Self {
        self.requests += other.requests;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.aborted += other.aborted;
        self.dropped_records += other.dropped_records;
        self
    }
}

pub struct ExportCoordinator {
    config: CoordinatorConfig,
    encoder: LogsEncoder,
    compressor: Arc<Compressor>,
    queue: Option<Arc<ExportQueue>>,
    transport: Arc<Transport>,
    events: broadcast::Sender<ExportEvent>,
    stats: CoordinatorCounters,
}

#[derive(Default)]
struct CoordinatorCounters {
    batches: AtomicU64,
    requests: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
    dropped_records: AtomicU64,
    replayed: AtomicU64,
}

impl ExportCoordinator {
    /// `queue` is only consulted when `config.durable` is set
    pub fn new(
        config: CoordinatorConfig,
        encoder: LogsEncoder,
        compressor: Arc<Compressor>,
        queue: Option<Arc<ExportQueue>>,
        transport: Arc<Transport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = if config.durable { queue } else { None };

        Self {
            config,
            encoder,
            compressor,
            queue,
            transport,
            events,
            stats: CoordinatorCounters::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn queue(&self) -> Option<&Arc<ExportQueue>> {
        self.queue.as_ref()
    }

    /// Subscribe to export events
    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.events.subscribe()
    }

    /// Export one batch of records
    pub async fn export(&self, records: Vec<Record>) -> ExportSummary {
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        let mut summary = ExportSummary::default();

        if records.is_empty() {
            return summary;
        }

        let requests = match self.build_requests(&records).await {
            Ok(requests) => requests,
            Err(e) => {
                error!("Dropping batch of {} records: {}", records.len(), e);
                self.stats
                    .dropped_records
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
                metrics::counter!("logship_records_dropped_total", "reason" => "encoding")
                    .increment(records.len() as u64);
                summary.dropped_records = records.len();
                self.emit(ExportEvent::Dropped {
                    records: records.len(),
                    error: e,
                });
                return summary;
            }
        };

        debug!(
            "Batch of {} records encoded into {} requests",
            records.len(),
            requests.len()
        );

        for (request, count) in requests {
            let report = self.deliver(request, count).await;
            summary.record(&report.outcome);
        }

        summary
    }

    /// Resend everything persisted for this session by an earlier process
    pub async fn replay(&self) -> ExportSummary {
        let mut summary = ExportSummary::default();
        let Some(queue) = &self.queue else {
            return summary;
        };

        let pending = queue.drain_for_session(&self.config.session_id).await;
        if pending.is_empty() {
            return summary;
        }

        info!(
            "Replaying {} queued requests for session {}",
            pending.len(),
            self.config.session_id
        );
        self.stats
            .replayed
            .fetch_add(pending.len() as u64, Ordering::Relaxed);

        for request in pending {
            // Record count is not persisted
            let report = self.deliver(request, 0).await;
            summary.record(&report.outcome);
        }

        summary
    }

    /// Encode and compress records into addressed requests
    async fn build_requests(&self, records: &[Record]) -> Result<Vec<(ExportRequest, usize)>> {
        let documents = self
            .encoder
            .encode_batches(records, self.config.max_chunk_size)?;

        let mut headers = self.config.headers.clone();
        headers.insert(
            "Content-Encoding".to_string(),
            self.compressor.encoding().as_header().to_string(),
        );

        let mut requests = Vec::with_capacity(documents.len());
        for document in documents {
            let count = document.log_records().count();
            let json = document.to_json()?;
            let payload = self.compressor.compress(Bytes::from(json)).await?;

            requests.push((
                ExportRequest::new(
                    self.config.session_id.as_str(),
                    self.config.endpoint.as_str(),
                    headers.clone(),
                    payload,
                ),
                count,
            ));
        }

        Ok(requests)
    }

    async fn deliver(&self, request: ExportRequest, records: usize) -> SendReport {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        let persisted = match &self.queue {
            Some(queue) => {
                let persisted = queue.persist(&request).await;
                if !persisted {
                    warn!(
                        "Request {} not persisted, sending without durability",
                        request.request_id
                    );
                }
                persisted
            }
            None => false,
        };

        // A persisted request survives an abandoned retry
        let options = SendOptions {
            suppress_when_hidden: persisted,
        };
        let report = self.transport.send(&request, options).await;

        match &report.outcome {
            SendOutcome::Success => {
                if persisted {
                    if let Some(queue) = &self.queue {
                        queue.remove(&request.request_id).await;
                    }
                }
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Request {} delivered after {} attempts",
                    request.request_id, report.attempts
                );
                self.emit(ExportEvent::Succeeded {
                    request_id: request.request_id,
                    records,
                    attempts: report.attempts,
                });
            }
            SendOutcome::Aborted(reason) => {
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                debug!("Request {} aborted ({:?})", request.request_id, reason);
                self.emit(ExportEvent::Aborted {
                    request_id: request.request_id,
                    error: reason.as_error(),
                });
            }
            SendOutcome::Failed(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Request {} failed after {} attempts: {}{}",
                    request.request_id,
                    report.attempts,
                    e,
                    if persisted { " (kept for next start)" } else { "" }
                );
                self.emit(ExportEvent::Failed {
                    request_id: request.request_id,
                    error: e.clone(),
                });
            }
        }

        report
    }

    fn emit(&self, event: ExportEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.stats;
        CoordinatorStats {
            batches: c.batches.load(Ordering::Relaxed),
            requests: c.requests.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            dropped_records: c.dropped_records.load(Ordering::Relaxed),
            replayed: c.replayed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl BatchSink for ExportCoordinator {
    async fn export_batch(&self, batch: Vec<Record>) {
        let summary = self.export(batch).await;
        if summary.failed > 0 || summary.dropped_records > 0 {
            debug!("Batch export finished with losses: {:?}", summary);
        }
    }
}

/// Coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub batches: u64,
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub aborted: u64,
    pub dropped_records: u64,
    pub replayed: u64,
}
