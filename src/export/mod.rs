// src/export/mod.rs
//! Record batching, encoding and durable queuing
//!
//! - **Scheduler**: buffers records, flushes on a timer or on demand
//! - **Encoder**: OTLP/JSON logs documents, chunking of oversized bodies
//! - **Compressor**: gzip/zstd with a streaming-first, buffered-fallback strategy
//! - **Queue**: size-capped persisted backlog of in-flight requests
//! - **Storage**: key-value adapters (SQLite, in-memory)
//! - **Coordinator**: drives a batch from encoding through delivery
//! - **Pipeline**: builds all of the above from `ExporterConfig`
//!
//! # Architecture
//!
//! ```text
//! on_record() → BatchScheduler ──(5s timer | force_flush)──→ ExportCoordinator
//!                                                                  ↓
//!                                                   encode → compress → persist
//!                                                                  ↓
//!                                                          Transport::send
//!                                                                  ↓
//!                                                   remove on success, else keep
//! ```

pub mod compressor;
pub mod coordinator;
pub mod encoder;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod request;
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use compressor::{CompressionLevel, Compressor, ContentEncoding};
pub use coordinator::{ExportCoordinator, ExportEvent, ExportSummary};
pub use encoder::{chunk, reassemble, Chunk, ExportLogsServiceRequest, LogsEncoder};
pub use pipeline::ExportPipeline;
pub use queue::{ExportQueue, ExportQueueStats};
pub use record::{AnyValue, KeyValue, Record};
pub use request::ExportRequest;
pub use scheduler::{BatchScheduler, BatchSink, RecordSink, SchedulerConfig};
pub use storage::{MemoryStorage, SqliteStorage, StorageAdapter, StorageConfig};
