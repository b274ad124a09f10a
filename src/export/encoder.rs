// src/export/encoder.rs
//! OTLP/JSON logs encoding and chunking
//!
//! Turns a batch of records into one or more `ExportLogsServiceRequest`
//! documents. Records are packed greedily into documents no larger than the
//! configured chunk size; a record whose body alone is too large is split
//! into sequenced chunks, one chunk per document, so the collector can
//! reassemble them in any arrival order.

use crate::export::record::{AnyValue, KeyValue, Record};
use crate::utils::errors::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Attribute carrying a chunk's byte offset within the full body
pub const ATTR_CHUNK_OFFSET: &str = "rr-web.offset";
/// Attribute carrying the index of the record a chunk belongs to
pub const ATTR_CHUNK_EVENT: &str = "rr-web.event";
/// Attribute carrying the chunk's position
pub const ATTR_CHUNK_INDEX: &str = "rr-web.chunk";
/// Attribute carrying the number of chunks for the record
pub const ATTR_CHUNK_TOTAL: &str = "rr-web.total-chunks";

/// Default chunk size (~950 KB)
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 950_000;

/// Top-level OTLP logs document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLogsServiceRequest {
    pub resource_logs: Vec<ResourceLogs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLogs {
    pub resource: Resource,
    pub scope_logs: Vec<ScopeLogs>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeLogs {
    pub scope: InstrumentationScope,
    pub log_records: Vec<LogRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(with = "u64_as_string")]
    pub time_unix_nano: u64,
    pub body: AnyValue,
    pub attributes: Vec<KeyValue>,
}

impl ExportLogsServiceRequest {
    /// All log records across resources and scopes
    pub fn log_records(&self) -> impl Iterator<Item = &LogRecord> {
        self.resource_logs
            .iter()
            .flat_map(|r| r.scope_logs.iter())
            .flat_map(|s| s.log_records.iter())
    }

    /// Serialize to JSON bytes
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ExporterError::Serialization(format!("JSON serialization error: {}", e))
        })
    }
}

/// One piece of a split body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of `data` within the full body
    pub offset: usize,

    /// Index of the record the body belongs to within its batch
    pub event_index: usize,

    pub chunk_index: usize,

    pub total_chunks: usize,

    pub data: Vec<u8>,
}

/// Split `bytes` into ordered pieces of at most `max_chunk_size` bytes.
///
/// A `max_chunk_size` of zero is treated as one. Empty input yields a single
/// empty chunk so every record is represented on the wire.
pub fn chunk(bytes: &[u8], max_chunk_size: usize) -> Vec<Chunk> {
    let size = max_chunk_size.max(1);

    if bytes.is_empty() {
        return vec![Chunk {
            offset: 0,
            event_index: 0,
            chunk_index: 0,
            total_chunks: 1,
            data: Vec::new(),
        }];
    }

    let total_chunks = bytes.len().div_ceil(size);
    bytes
        .chunks(size)
        .enumerate()
        .map(|(chunk_index, data)| Chunk {
            offset: chunk_index * size,
            event_index: 0,
            chunk_index,
            total_chunks,
            data: data.to_vec(),
        })
        .collect()
}

/// Reassemble chunks of one body, tolerating out-of-order input
pub fn reassemble(chunks: &[Chunk]) -> Vec<u8> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.chunk_index);
    ordered.iter().flat_map(|c| c.data.iter().copied()).collect()
}

/// Encodes record batches into OTLP/JSON logs documents
#[derive(Debug, Clone)]
pub struct LogsEncoder {
    resource: Resource,
    scope: InstrumentationScope,
}

impl LogsEncoder {
    pub fn new(resource_attributes: Vec<KeyValue>, scope_name: &str, scope_version: &str) -> Self {
        Self {
            resource: Resource {
                attributes: resource_attributes,
            },
            scope: InstrumentationScope {
                name: scope_name.to_string(),
                version: scope_version.to_string(),
            },
        }
    }

    /// Encode every record into a single document
    pub fn encode(&self, records: &[Record]) -> ExportLogsServiceRequest {
        self.document(records.iter().map(to_log_record).collect())
    }

    /// Encode records into documents bounded by `max_chunk_size`.
    ///
    /// Record order is preserved across the returned documents.
    pub fn encode_batches(
        &self,
        records: &[Record],
        max_chunk_size: usize,
    ) -> Result<Vec<ExportLogsServiceRequest>> {
        let overhead = self.document(Vec::new()).to_json()?.len();
        let mut documents = Vec::new();
        let mut current: Vec<LogRecord> = Vec::new();
        let mut current_size = overhead;

        for (event_index, record) in records.iter().enumerate() {
            let log = to_log_record(record);
            // +1 for the separating comma
            let size = serialized_len(&log)? + 1;

            if overhead + size <= max_chunk_size {
                if current_size + size > max_chunk_size && !current.is_empty() {
                    documents.push(self.document(std::mem::take(&mut current)));
                    current_size = overhead;
                }
                current.push(log);
                current_size += size;
                continue;
            }

            if !current.is_empty() {
                documents.push(self.document(std::mem::take(&mut current)));
                current_size = overhead;
            }

            let body = body_bytes(&record.body)?;
            let pieces = chunk(&body, max_chunk_size);
            debug!(
                "Record {} body of {} bytes split into {} chunks",
                event_index,
                body.len(),
                pieces.len()
            );

            for mut piece in pieces {
                piece.event_index = event_index;
                documents.push(self.document(vec![chunk_log_record(record, piece)]));
            }
        }

        if !current.is_empty() {
            documents.push(self.document(current));
        }

        Ok(documents)
    }

    fn document(&self, log_records: Vec<LogRecord>) -> ExportLogsServiceRequest {
        ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                resource: self.resource.clone(),
                scope_logs: vec![ScopeLogs {
                    scope: self.scope.clone(),
                    log_records,
                }],
            }],
        }
    }
}

fn to_log_record(record: &Record) -> LogRecord {
    LogRecord {
        time_unix_nano: record.timestamp_nanos,
        body: record.body.clone(),
        attributes: record.attributes.clone(),
    }
}

fn chunk_log_record(record: &Record, piece: Chunk) -> LogRecord {
    let mut attributes = record.attributes.clone();
    attributes.push(KeyValue::new(ATTR_CHUNK_OFFSET, piece.offset));
    attributes.push(KeyValue::new(ATTR_CHUNK_EVENT, piece.event_index));
    attributes.push(KeyValue::new(ATTR_CHUNK_INDEX, piece.chunk_index));
    attributes.push(KeyValue::new(ATTR_CHUNK_TOTAL, piece.total_chunks));

    LogRecord {
        time_unix_nano: record.timestamp_nanos,
        body: AnyValue::BytesValue(piece.data),
        attributes,
    }
}

/// Raw bytes of a body: strings and bytes as-is, everything else as JSON
fn body_bytes(body: &AnyValue) -> Result<Vec<u8>> {
    match body {
        AnyValue::StringValue(s) => Ok(s.as_bytes().to_vec()),
        AnyValue::BytesValue(b) => Ok(b.clone()),
        other => serde_json::to_vec(other).map_err(|e| {
            ExporterError::Serialization(format!("Body serialization error: {}", e))
        }),
    }
}

fn serialized_len(log: &LogRecord) -> Result<usize> {
    serde_json::to_vec(log)
        .map(|v| v.len())
        .map_err(|e| ExporterError::Serialization(format!("Log record serialization error: {}", e)))
}

mod u64_as_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}
