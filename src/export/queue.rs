// src/export/queue.rs
//! Durable export queue
//!
//! Keeps a copy of every in-flight request in a single storage key so a
//! later process start can retry it. The total serialized size of the stored
//! array is capped; the cap is enforced on write, and a persist that would
//! cross it is rejected rather than evicting older entries.
//!
//! Storage failures never fail an export: the call reports `false` (or
//! nothing, for removal), the failure is logged and counted, and the request
//! is simply not recoverable if the process dies before it completes.

use crate::export::record::bytes_as_base64;
use crate::export::request::ExportRequest;
use crate::export::storage::StorageAdapter;
use crate::utils::errors::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Storage key holding the queue
pub const QUEUE_STORAGE_KEY: &str = "logship.export-queue";

/// Persisted form of an export request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueEntry {
    #[serde(with = "bytes_as_base64")]
    data: Vec<u8>,
    headers: BTreeMap<String, String>,
    request_id: String,
    session_id: String,
    timestamp: i64,
    url: String,
}

impl From<&ExportRequest> for QueueEntry {
    fn from(request: &ExportRequest) -> Self {
        Self {
            data: request.payload.clone(),
            headers: request.headers.clone(),
            request_id: request.request_id.clone(),
            session_id: request.session_id.clone(),
            timestamp: request.enqueued_at_millis,
            url: request.url.clone(),
        }
    }
}

impl From<QueueEntry> for ExportRequest {
    fn from(entry: QueueEntry) -> Self {
        Self {
            request_id: entry.request_id,
            session_id: entry.session_id,
            url: entry.url,
            headers: entry.headers,
            payload: entry.data,
            enqueued_at_millis: entry.timestamp,
        }
    }
}

/// Size-capped persisted backlog of export requests
pub struct ExportQueue {
    storage: Arc<dyn StorageAdapter>,
    cap_bytes: usize,

    /// Serializes read-modify-write cycles on the stored blob
    lock: Mutex<()>,

    persisted: AtomicU64,
    rejected: AtomicU64,
    removed: AtomicU64,
    storage_failures: AtomicU64,
    discarded: AtomicU64,
}

impl ExportQueue {
    pub fn new(storage: Arc<dyn StorageAdapter>, cap_bytes: usize) -> Self {
        Self {
            storage,
            cap_bytes,
            lock: Mutex::new(()),
            persisted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn cap_bytes(&self) -> usize {
        self.cap_bytes
    }

    /// Persist a request; `false` if it would exceed the cap or storage failed
    pub async fn persist(&self, request: &ExportRequest) -> bool {
        let _guard = self.lock.lock().await;

        let mut entries = match self.load().await {
            Ok(entries) => entries,
            Err(e) => {
                self.storage_failure("persist", &e);
                return false;
            }
        };

        entries.retain(|entry| entry.request_id != request.request_id);
        entries.push(QueueEntry::from(request));

        let serialized = match serialize(&entries) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Could not serialize export queue: {}", e);
                return false;
            }
        };

        if serialized.len() > self.cap_bytes {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("logship_queue_rejected_total", "reason" => "cap").increment(1);
            warn!(
                "Export queue full: request {} would grow queue to {} bytes (cap {})",
                request.request_id,
                serialized.len(),
                self.cap_bytes
            );
            return false;
        }

        if let Err(e) = self.storage.set(QUEUE_STORAGE_KEY, &serialized).await {
            self.storage_failure("persist", &e);
            return false;
        }

        self.persisted.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Persisted request {} ({} entries, {} bytes)",
            request.request_id,
            entries.len(),
            serialized.len()
        );

        true
    }

    /// Remove a request by id; absent ids are a no-op
    pub async fn remove(&self, request_id: &str) {
        let _guard = self.lock.lock().await;

        let mut entries = match self.load().await {
            Ok(entries) => entries,
            Err(e) => {
                self.storage_failure("remove", &e);
                return;
            }
        };

        let before = entries.len();
        entries.retain(|entry| entry.request_id != request_id);
        if entries.len() == before {
            return;
        }

        let result = if entries.is_empty() {
            self.storage.remove(QUEUE_STORAGE_KEY).await
        } else {
            match serialize(&entries) {
                Ok(serialized) => self.storage.set(QUEUE_STORAGE_KEY, &serialized).await,
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                self.removed.fetch_add(1, Ordering::Relaxed);
                debug!("Removed request {} from export queue", request_id);
            }
            Err(e) => self.storage_failure("remove", &e),
        }
    }

    /// Take every stored request, clear the store, and keep only the ones
    /// belonging to `session_id`
    pub async fn drain_for_session(&self, session_id: &str) -> Vec<ExportRequest> {
        let _guard = self.lock.lock().await;

        let entries = match self.load().await {
            Ok(entries) => entries,
            Err(e) => {
                self.storage_failure("drain", &e);
                return Vec::new();
            }
        };

        // Entries that cannot be cleared would be replayed again on every start
        if let Err(e) = self.storage.remove(QUEUE_STORAGE_KEY).await {
            self.storage_failure("drain", &e);
            if let Err(e) = self.storage.set(QUEUE_STORAGE_KEY, "[]").await {
                self.storage_failure("drain", &e);
                return Vec::new();
            }
        }

        let total = entries.len();
        let matching: Vec<ExportRequest> = entries
            .into_iter()
            .filter(|entry| entry.session_id == session_id)
            .map(ExportRequest::from)
            .collect();

        let discarded = total - matching.len();
        if discarded > 0 {
            self.discarded.fetch_add(discarded as u64, Ordering::Relaxed);
            debug!("Discarded {} queued requests from other sessions", discarded);
        }

        matching
    }

    /// Number of stored requests
    pub async fn len(&self) -> usize {
        let _guard = self.lock.lock().await;
        self.load().await.map(|entries| entries.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Serialized size of the stored queue
    pub async fn total_size(&self) -> usize {
        let _guard = self.lock.lock().await;
        match self.storage.get(QUEUE_STORAGE_KEY).await {
            Ok(Some(raw)) => raw.len(),
            _ => 0,
        }
    }

    pub fn stats(&self) -> ExportQueueStats {
        ExportQueueStats {
            persisted: self.persisted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Read stored entries; malformed data reads as empty
    async fn load(&self) -> Result<Vec<QueueEntry>> {
        let raw = match self.storage.get(QUEUE_STORAGE_KEY).await? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };

        match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Ignoring malformed export queue ({} bytes): {}", raw.len(), e);
                Ok(Vec::new())
            }
        }
    }

    fn storage_failure(&self, operation: &str, error: &ExporterError) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("logship_queue_rejected_total", "reason" => "storage").increment(1);
        warn!("Export queue {} failed, continuing without durability: {}", operation, error);
    }
}

fn serialize(entries: &[QueueEntry]) -> Result<String> {
    serde_json::to_string(entries)
        .map_err(|e| ExporterError::Serialization(format!("Queue serialization error: {}", e)))
}

/// Export queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportQueueStats {
    /// Successful persists
    pub persisted: u64,

    /// Persists refused by the size cap
    pub rejected: u64,

    pub removed: u64,

    /// Reads or writes that failed in storage
    pub storage_failures: u64,

    /// Entries dropped on drain because they belonged to another session
    pub discarded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::storage::MemoryStorage;
    use proptest::prelude::*;

    const CAP: usize = 2 * 1024 * 1024;

    fn request(session: &str, payload_len: usize) -> ExportRequest {
        ExportRequest::new(
            session,
            "http://collector/v1/logs",
            BTreeMap::from([("Content-Encoding".to_string(), "gzip".to_string())]),
            vec![7u8; payload_len],
        )
    }

    fn queue() -> (Arc<MemoryStorage>, ExportQueue) {
        let storage = Arc::new(MemoryStorage::with_quota(16 * 1024 * 1024));
        let queue = ExportQueue::new(storage.clone(), CAP);
        (storage, queue)
    }

    #[tokio::test]
    async fn test_persist_and_drain() {
        let (_, queue) = queue();
        let req = request("s1", 10);

        assert!(queue.persist(&req).await);
        assert_eq!(queue.len().await, 1);

        let drained = queue.drain_for_session("s1").await;
        assert_eq!(drained, vec![req]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_stored_schema() {
        let (storage, queue) = queue();
        let req = request("s1", 3);
        queue.persist(&req).await;

        let raw = storage.get(QUEUE_STORAGE_KEY).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &json[0];

        assert_eq!(entry["data"], "BwcH");
        assert_eq!(entry["requestId"], req.request_id.as_str());
        assert_eq!(entry["sessionId"], "s1");
        assert_eq!(entry["url"], "http://collector/v1/logs");
        assert_eq!(entry["headers"]["Content-Encoding"], "gzip");
        assert_eq!(entry["timestamp"], req.enqueued_at_millis);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_, queue) = queue();
        let keep = request("s1", 10);
        let gone = request("s1", 10);
        queue.persist(&keep).await;
        queue.persist(&gone).await;

        queue.remove(&gone.request_id).await;
        let size_after_first = queue.total_size().await;
        queue.remove(&gone.request_id).await;
        queue.remove("never-persisted").await;

        assert_eq!(queue.total_size().await, size_after_first);
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.stats().removed, 1);
    }

    #[tokio::test]
    async fn test_second_large_entry_rejected() {
        let (_, queue) = queue();
        // ~1.5 MB once base64 encoded
        let first = request("s1", 1_100_000);
        let second = request("s1", 1_100_000);

        assert!(queue.persist(&first).await);
        let size_before = queue.total_size().await;

        assert!(!queue.persist(&second).await);
        assert_eq!(queue.total_size().await, size_before);
        assert_eq!(queue.drain_for_session("s1").await, vec![first]);
        assert_eq!(queue.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_oversized_single_request_rejected() {
        let (_, queue) = queue();
        let small = request("s1", 100);
        queue.persist(&small).await;

        assert!(!queue.persist(&request("s1", CAP + 1)).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_drain_filters_other_sessions() {
        let (_, queue) = queue();
        let mine = request("current", 10);
        queue.persist(&request("old-1", 10)).await;
        queue.persist(&mine).await;
        queue.persist(&request("old-2", 10)).await;

        let drained = queue.drain_for_session("current").await;
        assert_eq!(drained, vec![mine]);
        assert_eq!(queue.stats().discarded, 2);

        // discarded entries are gone for good
        assert!(queue.drain_for_session("old-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_store_reads_as_empty() {
        let (storage, queue) = queue();
        storage.set(QUEUE_STORAGE_KEY, "{not json").await.unwrap();
        assert!(queue.drain_for_session("s1").await.is_empty());

        storage
            .set(QUEUE_STORAGE_KEY, r#"[{"requestId": "missing-fields"}]"#)
            .await
            .unwrap();
        assert_eq!(queue.len().await, 0);

        assert!(queue.persist(&request("s1", 10)).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_degrades() {
        let (storage, queue) = queue();
        storage.set_available(false);

        assert!(!queue.persist(&request("s1", 10)).await);
        queue.remove("anything").await;
        assert!(queue.drain_for_session("s1").await.is_empty());

        assert_eq!(queue.stats().storage_failures, 3);
        assert_eq!(queue.stats().rejected, 0);
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_storage_failure() {
        let storage = Arc::new(MemoryStorage::with_quota(100));
        let queue = ExportQueue::new(storage, CAP);

        assert!(!queue.persist(&request("s1", 500)).await);
        assert_eq!(queue.stats().storage_failures, 1);
    }

    /// Memory store whose `remove` always fails; `set` can be made to fail too
    #[derive(Default)]
    struct StuckStorage {
        inner: MemoryStorage,
        fail_set: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl StorageAdapter for StuckStorage {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_set.load(Ordering::SeqCst) {
                return Err(ExporterError::Storage("read-only".to_string()));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(ExporterError::Storage("remove unsupported".to_string()))
        }
    }

    #[tokio::test]
    async fn test_drain_clears_store_when_remove_fails() {
        let storage = Arc::new(StuckStorage::default());
        let queue = ExportQueue::new(storage.clone(), CAP);
        let mine = request("s1", 10);
        queue.persist(&request("old", 10)).await;
        queue.persist(&mine).await;

        assert_eq!(queue.drain_for_session("s1").await, vec![mine]);
        assert_eq!(storage.get(QUEUE_STORAGE_KEY).await.unwrap().as_deref(), Some("[]"));
        assert!(queue.drain_for_session("s1").await.is_empty());
        assert_eq!(queue.stats().storage_failures, 2);
    }

    #[tokio::test]
    async fn test_drain_returns_nothing_when_store_cannot_be_cleared() {
        let storage = Arc::new(StuckStorage::default());
        let queue = ExportQueue::new(storage.clone(), CAP);
        queue.persist(&request("s1", 10)).await;
        storage.fail_set.store(true, Ordering::SeqCst);

        assert!(queue.drain_for_session("s1").await.is_empty());
        assert_eq!(queue.stats().storage_failures, 2);
    }

    #[tokio::test]
    async fn test_persist_same_request_twice_keeps_one_copy() {
        let (_, queue) = queue();
        let req = request("s1", 10);
        queue.persist(&req).await;
        queue.persist(&req).await;
        assert_eq!(queue.len().await, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_total_size_never_exceeds_cap(sizes in proptest::collection::vec(0usize..6_000, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let storage = Arc::new(MemoryStorage::new());
                let queue = ExportQueue::new(storage, 32 * 1024);

                for size in sizes {
                    let before = queue.total_size().await;
                    let accepted = queue.persist(&request("s", size)).await;
                    let after = queue.total_size().await;

                    assert!(after <= queue.cap_bytes());
                    if !accepted {
                        assert_eq!(before, after);
                    }
                }
            });
        }
    }
}
