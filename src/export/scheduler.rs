// src/export/scheduler.rs
//! Batch scheduler
//!
//! Buffers records and flushes them as one batch, either when the scheduled
//! delay elapses or when a flush is forced (host hidden or terminating).
//! At most one flush timer is pending at a time; the first record into an
//! idle scheduler arms it.

use crate::export::record::Record;
use crate::utils::errors::{ExporterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Receives flushed batches
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn export_batch(&self, batch: Vec<Record>);
}

/// Producer-facing entry point
pub trait RecordSink: Send + Sync {
    fn on_record(&self, record: Record) -> Result<()>;
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between the first buffered record and the flush
    pub scheduled_delay: Duration,

    /// Maximum number of buffered records
    pub max_queue_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduled_delay: Duration::from_millis(5000),
            max_queue_size: 100_000,
        }
    }
}

/// Time- or force-triggered batcher
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    buffer: Mutex<Vec<Record>>,
    timer_pending: AtomicBool,
    accepting: AtomicBool,
    sink: Arc<dyn BatchSink>,
    /// Runtime the flush timer is spawned on, captured at construction
    runtime: Option<Handle>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    batches_flushed: AtomicU64,
    records_flushed: AtomicU64,
}

impl BatchScheduler {
    /// Create a scheduler bound to the current runtime, if any.
    ///
    /// A scheduler built inside a runtime accepts records from any thread.
    pub fn new(config: SchedulerConfig, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                buffer: Mutex::new(Vec::new()),
                timer_pending: AtomicBool::new(false),
                accepting: AtomicBool::new(true),
                sink,
                runtime: Handle::try_current().ok(),
                enqueued: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                batches_flushed: AtomicU64::new(0),
                records_flushed: AtomicU64::new(0),
            }),
        }
    }

    /// Buffer a record and arm the flush timer if idle
    pub fn enqueue(&self, record: Record) -> Result<()> {
        let inner = &self.inner;

        if !inner.accepting.load(Ordering::SeqCst) {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("logship_records_dropped_total", "reason" => "shutdown").increment(1);
            return Err(ExporterError::AbortedByRuntime);
        }

        // Without a runtime nothing would ever flush the record
        let Some(runtime) = inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("logship_records_dropped_total", "reason" => "no_runtime")
                .increment(1);
            warn!("No Tokio runtime available, dropping record");
            return Err(ExporterError::AbortedByRuntime);
        };

        {
            let mut buffer = inner.buffer.lock();
            if buffer.len() >= inner.config.max_queue_size {
                drop(buffer);
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("logship_records_dropped_total", "reason" => "buffer_full")
                    .increment(1);
                warn!("Record buffer full, dropping record");
                return Err(ExporterError::BufferFull {
                    capacity: inner.config.max_queue_size,
                });
            }
            buffer.push(record);
        }

        inner.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("logship_records_enqueued_total").increment(1);

        if !inner.timer_pending.swap(true, Ordering::SeqCst) {
            self.schedule(&runtime);
        }

        Ok(())
    }

    fn schedule(&self, runtime: &Handle) {
        let inner = Arc::clone(&self.inner);
        let delay = inner.config.scheduled_delay;

        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Cleared before flushing so records arriving mid-flush re-arm it
            inner.timer_pending.store(false, Ordering::SeqCst);
            inner.flush().await;
        });
    }

    /// Flush whatever is buffered now
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Flush immediately regardless of timer state
    pub async fn force_flush(&self) {
        debug!("Forced flush requested");
        self.inner.flush().await;
    }

    /// Stop accepting records and flush the remainder
    pub async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.flush().await;
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = &self.inner;
        SchedulerStats {
            enqueued: inner.enqueued.load(Ordering::Relaxed),
            dropped: inner.dropped.load(Ordering::Relaxed),
            batches_flushed: inner.batches_flushed.load(Ordering::Relaxed),
            records_flushed: inner.records_flushed.load(Ordering::Relaxed),
            buffered: self.len(),
        }
    }
}

impl Inner {
    async fn flush(&self) {
        // Drained before the first await so concurrent enqueues go to the next batch
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return;
        }

        let size = batch.len();
        debug!("Flushing batch of {} records", size);

        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.records_flushed.fetch_add(size as u64, Ordering::Relaxed);
        metrics::counter!("logship_batches_flushed_total").increment(1);

        self.sink.export_batch(batch).await;
    }
}

impl RecordSink for BatchScheduler {
    fn on_record(&self, record: Record) -> Result<()> {
        self.enqueue(record)
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub buffered: usize,
}

impl SchedulerStats {
    /// Dropped records as a percentage of submitted ones
    pub fn drop_rate(&self) -> f64 {
        let submitted = self.enqueued + self.dropped;
        if submitted == 0 {
            0.0
        } else {
            (self.dropped as f64 / submitted as f64) * 100.0
        }
    }
}
