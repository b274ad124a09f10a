// src/export/request.rs
//! Addressed, retryable unit of network work

use std::collections::BTreeMap;

/// A fully encoded export request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    /// Unique id, never reused; the dedup/removal key
    pub request_id: String,

    pub session_id: String,

    pub url: String,

    pub headers: BTreeMap<String, String>,

    /// Compressed body
    pub payload: Vec<u8>,

    /// Creation time (milliseconds since epoch)
    pub enqueued_at_millis: i64,
}

impl ExportRequest {
    /// New request with a fresh ULID and the current time
    pub fn new(
        session_id: impl Into<String>,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            request_id: ulid::Ulid::new().to_string(),
            session_id: session_id.into(),
            url: url.into(),
            headers,
            payload,
            enqueued_at_millis: chrono::Utc::now().timestamp_millis(),
        }
    }
}
