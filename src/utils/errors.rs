// src/utils/errors.rs
//! Error taxonomy for the export pipeline
//!
//! Every failure path in the pipeline maps onto one of these variants. Only
//! `BufferFull` ever reaches a producer; everything else is handled inside
//! the pipeline and reported through export events.

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors raised by the export pipeline
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExporterError {
    /// No response received (network down, DNS failure, I/O timeout)
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Superseded by a newer attempt or explicitly cancelled
    #[error("Request aborted by caller")]
    AbortedByCaller,

    /// Host lifecycle aborted the attempt (hidden or terminating)
    #[error("Request aborted by runtime")]
    AbortedByRuntime,

    /// Response received with an error status
    #[error("HTTP status {code}")]
    HttpStatus { code: u16 },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Persist/read failed (quota exceeded, storage unavailable)
    #[error("Storage failed: {0}")]
    Storage(String),

    /// All compression strategies exhausted
    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// In-memory record buffer is at capacity
    #[error("Record buffer full ({capacity} records)")]
    BufferFull { capacity: usize },
}

/// Copyable error tag kept in retry state and export events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    AbortedByCaller,
    AbortedByRuntime,
    HttpStatus(u16),
    Serialization,
    Storage,
    Compression,
    Config,
    BufferFull,
}

impl ExporterError {
    /// Error tag for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExporterError::Connection(_) => ErrorKind::Connection,
            ExporterError::AbortedByCaller => ErrorKind::AbortedByCaller,
            ExporterError::AbortedByRuntime => ErrorKind::AbortedByRuntime,
            ExporterError::HttpStatus { code } => ErrorKind::HttpStatus(*code),
            ExporterError::Serialization(_) => ErrorKind::Serialization,
            ExporterError::Storage(_) => ErrorKind::Storage,
            ExporterError::Compression(_) => ErrorKind::Compression,
            ExporterError::Config(_) => ErrorKind::Config,
            ExporterError::BufferFull { .. } => ErrorKind::BufferFull,
        }
    }

    /// Whether this error is an abort rather than a failure
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            ExporterError::AbortedByCaller | ExporterError::AbortedByRuntime
        )
    }
}
