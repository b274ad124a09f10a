// src/transport/sender.rs
//! Retrying request sender
//!
//! Each `send` walks the state machine
//!
//! ```text
//! Pending → Sending → Success
//!              │  ↑
//!              ↓  │
//!           RetryWait ──→ Aborted | Failed
//! ```
//!
//! At most one attempt is in flight per URL. Starting a send to a URL
//! cancels the attempt already in flight there; the superseded send ends
//! `Aborted(Superseded)`, which is not counted as a failure.
//!
//! While the host is hidden, small payloads go out as a keepalive send: one
//! attempt on a detached task that completes even if the caller is torn
//! down. Retries would never be observed in that state anyway.

use crate::export::request::ExportRequest;
use crate::transport::backoff::{is_retryable_status, RetryPolicy, MAX_HTTP_STATUS_ATTEMPTS};
use crate::transport::client::HttpClient;
use crate::transport::lifecycle::Lifecycle;
use crate::utils::config::DEFAULT_KEEPALIVE_MAX_BYTES;
use crate::utils::errors::{ErrorKind, ExporterError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-request state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Sending,
    RetryWait,
    Success,
    Aborted,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Success | RequestState::Aborted | RequestState::Failed
        )
    }
}

/// Why an attempt stopped without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A newer send to the same URL took over
    Superseded,

    /// `Transport::cancel` was called
    Cancelled,

    /// The host became hidden during a backoff wait
    Hidden,
}

impl AbortReason {
    pub fn as_error(&self) -> ExporterError {
        match self {
            AbortReason::Superseded | AbortReason::Cancelled => ExporterError::AbortedByCaller,
            AbortReason::Hidden => ExporterError::AbortedByRuntime,
        }
    }
}

/// Terminal result of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Aborted(AbortReason),
    Failed(ExporterError),
}

impl SendOutcome {
    pub fn state(&self) -> RequestState {
        match self {
            SendOutcome::Success => RequestState::Success,
            SendOutcome::Aborted(_) => RequestState::Aborted,
            SendOutcome::Failed(_) => RequestState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }

    pub fn error(&self) -> Option<ExporterError> {
        match self {
            SendOutcome::Success => None,
            SendOutcome::Aborted(reason) => Some(reason.as_error()),
            SendOutcome::Failed(err) => Some(err.clone()),
        }
    }
}

/// Ephemeral counters for one send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts started so far
    pub attempt: u32,

    /// Attempts that ended in a retryable HTTP status
    pub http_status_attempts: u32,

    pub last_error: Option<ErrorKind>,
}

/// What `send` reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub outcome: SendOutcome,
    pub attempts: u32,
    pub last_error: Option<ErrorKind>,

    /// Sent through the keepalive path
    pub keepalive: bool,
}

/// Per-send options
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Abort a pending backoff wait as soon as the host becomes hidden
    pub suppress_when_hidden: bool,
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub retry: RetryPolicy,

    /// Largest payload eligible for a keepalive send
    pub keepalive_max_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            keepalive_max_bytes: DEFAULT_KEEPALIVE_MAX_BYTES,
        }
    }
}

/// In-flight attempt registered for a URL
struct Attempt {
    id: u64,
    token: CancellationToken,
    reason: Mutex<Option<AbortReason>>,
}

impl Attempt {
    fn abort(&self, reason: AbortReason) {
        self.reason.lock().get_or_insert(reason);
        self.token.cancel();
    }

    fn reason(&self) -> AbortReason {
        self.reason.lock().unwrap_or(AbortReason::Cancelled)
    }
}

/// Unregisters an attempt when its send completes or is dropped,
/// unless a newer attempt has taken the URL over
struct InFlightGuard<'a> {
    registry: &'a DashMap<String, Arc<Attempt>>,
    url: &'a str,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .remove_if(self.url, |_, current| current.id == self.id);
    }
}

/// Retrying, superseding HTTP sender
pub struct Transport {
    client: Arc<dyn HttpClient>,
    lifecycle: Lifecycle,
    config: TransportConfig,
    in_flight: DashMap<String, Arc<Attempt>>,
    next_attempt_id: AtomicU64,
    stats: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    sends: AtomicU64,
    http_attempts: AtomicU64,
    retries: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
    keepalive: AtomicU64,
}

impl Transport {
    pub fn new(client: Arc<dyn HttpClient>, lifecycle: Lifecycle, config: TransportConfig) -> Self {
        Self {
            client,
            lifecycle,
            config,
            in_flight: DashMap::new(),
            next_attempt_id: AtomicU64::new(1),
            stats: Arc::new(Counters::default()),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Send a request to its URL, retrying per policy
    pub async fn send(&self, request: &ExportRequest, options: SendOptions) -> SendReport {
        self.stats.sends.fetch_add(1, Ordering::Relaxed);

        let report = if self.lifecycle.is_hidden()
            && request.payload.len() <= self.config.keepalive_max_bytes
        {
            self.send_keepalive(request).await
        } else {
            let attempt = self.register(&request.url);
            let _registered = InFlightGuard {
                registry: &self.in_flight,
                url: &request.url,
                id: attempt.id,
            };
            self.send_with_retry(request, options, &attempt).await
        };

        self.record_outcome(request, &report);
        report
    }

    /// Abort the attempt in flight for `url`, if any
    pub fn cancel(&self, url: &str) -> bool {
        match self.in_flight.get(url) {
            Some(attempt) => {
                attempt.abort(AbortReason::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Number of URLs with an attempt in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> TransportStats {
        let c = &self.stats;
        TransportStats {
            sends: c.sends.load(Ordering::Relaxed),
            http_attempts: c.http_attempts.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            keepalive: c.keepalive.load(Ordering::Relaxed),
        }
    }

    fn register(&self, url: &str) -> Arc<Attempt> {
        let attempt = Arc::new(Attempt {
            id: self.next_attempt_id.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            reason: Mutex::new(None),
        });

        if let Some(previous) = self.in_flight.insert(url.to_string(), Arc::clone(&attempt)) {
            debug!("Superseding in-flight attempt {} to {}", previous.id, url);
            previous.abort(AbortReason::Superseded);
        }

        attempt
    }

    async fn send_with_retry(
        &self,
        request: &ExportRequest,
        options: SendOptions,
        attempt: &Attempt,
    ) -> SendReport {
        let policy = &self.config.retry;
        let mut state = RetryState::default();
        let mut current = RequestState::Pending;

        loop {
            state.attempt += 1;

            if state.attempt > 1 {
                let wait = policy.backoff(state.attempt);
                current = self.transition(request, current, RequestState::RetryWait);
                debug!(
                    "Retrying request {} (attempt {}) after {:?}",
                    request.request_id, state.attempt, wait
                );

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = attempt.token.cancelled() => {
                        return report(SendOutcome::Aborted(attempt.reason()), &state, false);
                    }
                    _ = self.lifecycle.hidden(), if options.suppress_when_hidden => {
                        info!("Host hidden, abandoning retry of request {}", request.request_id);
                        return report(SendOutcome::Aborted(AbortReason::Hidden), &state, false);
                    }
                }
            }

            current = self.transition(request, current, RequestState::Sending);
            self.stats.http_attempts.fetch_add(1, Ordering::Relaxed);

            let result = tokio::select! {
                result = self.client.post(request) => result,
                _ = attempt.token.cancelled() => {
                    return report(SendOutcome::Aborted(attempt.reason()), &state, false);
                }
            };

            let error = match result {
                Ok(response) if response.is_success() => {
                    self.transition(request, current, RequestState::Success);
                    return report(SendOutcome::Success, &state, false);
                }
                Ok(response) => {
                    let error = ExporterError::HttpStatus {
                        code: response.status,
                    };
                    state.last_error = Some(error.kind());

                    if !is_retryable_status(response.status) {
                        warn!(
                            "Request {} rejected with status {}",
                            request.request_id, response.status
                        );
                        return report(SendOutcome::Failed(error), &state, false);
                    }

                    state.http_status_attempts += 1;
                    if state.http_status_attempts >= MAX_HTTP_STATUS_ATTEMPTS {
                        warn!(
                            "Request {} failed after {} error statuses",
                            request.request_id, state.http_status_attempts
                        );
                        return report(SendOutcome::Failed(error), &state, false);
                    }
                    error
                }
                Err(error) => {
                    state.last_error = Some(error.kind());
                    error
                }
            };

            if state.attempt >= policy.max_attempts() {
                warn!(
                    "Request {} failed after {} attempts: {}",
                    request.request_id, state.attempt, error
                );
                return report(SendOutcome::Failed(error), &state, false);
            }

            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("logship_retries_total").increment(1);
            debug!("Request {} attempt {} failed: {}", request.request_id, state.attempt, error);
        }
    }

    /// Single attempt on a detached task
    async fn send_keepalive(&self, request: &ExportRequest) -> SendReport {
        if let Some((_, previous)) = self.in_flight.remove(&request.url) {
            previous.abort(AbortReason::Superseded);
        }

        self.stats.keepalive.fetch_add(1, Ordering::Relaxed);
        self.stats.http_attempts.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Host hidden, sending request {} ({} bytes) as keepalive",
            request.request_id,
            request.payload.len()
        );

        let client = Arc::clone(&self.client);
        let detached = request.clone();
        let handle = tokio::spawn(async move { client.post(&detached).await });

        let mut state = RetryState {
            attempt: 1,
            ..Default::default()
        };

        let outcome = match handle.await {
            Ok(Ok(response)) if response.is_success() => SendOutcome::Success,
            Ok(Ok(response)) => {
                let error = ExporterError::HttpStatus {
                    code: response.status,
                };
                state.last_error = Some(error.kind());
                SendOutcome::Failed(error)
            }
            Ok(Err(error)) => {
                state.last_error = Some(error.kind());
                SendOutcome::Failed(error)
            }
            Err(join_err) => {
                state.last_error = Some(ErrorKind::Connection);
                SendOutcome::Failed(ExporterError::Connection(format!(
                    "Keepalive task failed: {}",
                    join_err
                )))
            }
        };

        report(outcome, &state, true)
    }

    fn transition(
        &self,
        request: &ExportRequest,
        from: RequestState,
        to: RequestState,
    ) -> RequestState {
        debug!("Request {}: {:?} -> {:?}", request.request_id, from, to);
        to
    }

    fn record_outcome(&self, request: &ExportRequest, report: &SendReport) {
        let (counter, label) = match &report.outcome {
            SendOutcome::Success => (&self.stats.succeeded, "success"),
            SendOutcome::Aborted(reason) => {
                debug!("Request {} aborted: {:?}", request.request_id, reason);
                (&self.stats.aborted, "aborted")
            }
            SendOutcome::Failed(_) => (&self.stats.failed, "failed"),
        };

        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("logship_requests_total", "outcome" => label).increment(1);
    }
}

fn report(outcome: SendOutcome, state: &RetryState, keepalive: bool) -> SendReport {
    SendReport {
        outcome,
        attempts: state.attempt,
        last_error: state.last_error,
        keepalive,
    }
}

/// Transport counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub sends: u64,
    pub http_attempts: u64,
    pub retries: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub aborted: u64,
    pub keepalive: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::client::HttpResponse;
    use crate::transport::lifecycle::LifecycleState;
    use crate::utils::errors::Result;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Scripted client; once the script runs out it keeps answering 200
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<HttpResponse>>>,
        calls: AtomicU64,
        latency: Duration,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<HttpResponse>>) -> Arc<Self> {
            Self::with_latency(script, Duration::ZERO)
        }

        fn with_latency(script: Vec<Result<HttpResponse>>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU64::new(0),
                latency,
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn post(&self, _request: &ExportRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Ok(HttpResponse { status: 200 }))
        }
    }

    fn status(code: u16) -> Result<HttpResponse> {
        Ok(HttpResponse { status: code })
    }

    fn refused() -> Result<HttpResponse> {
        Err(ExporterError::Connection("connection refused".to_string()))
    }

    fn transport(client: Arc<ScriptedClient>, retry_count: u32) -> Transport {
        let config = TransportConfig {
            retry: RetryPolicy {
                retry_count,
                base_interval: Duration::from_millis(100),
                max_backoff: Duration::from_secs(60),
            },
            ..Default::default()
        };
        Transport::new(client, Lifecycle::new(), config)
    }

    fn request(url: &str, payload_len: usize) -> ExportRequest {
        ExportRequest::new("s1", url, BTreeMap::new(), vec![0u8; payload_len])
    }

    const URL: &str = "http://collector/v1/logs";

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let client = ScriptedClient::new(vec![]);
        let transport = transport(client.clone(), 100);

        let report = transport.send(&request(URL, 10), SendOptions::default()).await;
        assert_eq!(report.outcome, SendOutcome::Success);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.last_error, None);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_status_retries_capped_at_three() {
        let client = ScriptedClient::new(vec![status(503), status(503), status(503)]);
        let transport = transport(client.clone(), 100);

        let report = transport.send(&request(URL, 10), SendOptions::default()).await;
        assert_eq!(
            report.outcome,
            SendOutcome::Failed(ExporterError::HttpStatus { code: 503 })
        );
        assert_eq!(client.calls(), 3);
        assert_eq!(report.last_error, Some(ErrorKind::HttpStatus(503)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_status_then_success() {
        let client = ScriptedClient::new(vec![status(429), status(502)]);
        let transport = transport(client.clone(), 100);

        let report = transport.send(&request(URL, 10), SendOptions::default()).await;
        assert!(report.outcome.is_success());
        assert_eq!(report.attempts, 3);
        assert_eq!(transport.stats().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_is_terminal() {
        let client = ScriptedClient::new(vec![status(400)]);
        let transport = transport(client.clone(), 100);

        let report = transport.send(&request(URL, 10), SendOptions::default()).await;
        assert_eq!(report.outcome.state(), RequestState::Failed);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failures_use_retry_budget() {
        let client = ScriptedClient::new(vec![refused(), refused(), refused(), refused()]);
        let transport = transport(client.clone(), 2);

        let report = transport.send(&request(URL, 10), SendOptions::default()).await;
        assert!(matches!(
            report.outcome,
            SendOutcome::Failed(ExporterError::Connection(_))
        ));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failures_beyond_status_cap() {
        let client = ScriptedClient::new(vec![refused(); 5]);
        let transport = transport(client.clone(), 100);

        let report = transport.send(&request(URL, 10), SendOptions::default()).await;
        assert!(report.outcome.is_success());
        assert_eq!(report.attempts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let client = ScriptedClient::new(vec![refused(), refused()]);
        let transport = transport(client.clone(), 100);

        let start = Instant::now();
        let report = transport.send(&request(URL, 10), SendOptions::default()).await;
        assert!(report.outcome.is_success());

        // 200ms before attempt 2, 400ms before attempt 3
        assert!(start.elapsed() >= Duration::from_millis(600));
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_send_supersedes_in_flight() {
        let client = ScriptedClient::with_latency(vec![], Duration::from_secs(10));
        let transport = Arc::new(transport(client.clone(), 100));

        let first = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport.send(&request(URL, 10), SendOptions::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(transport.in_flight(), 1);

        let second = transport.send(&request(URL, 10), SendOptions::default()).await;
        let first = first.await.unwrap();

        assert_eq!(first.outcome, SendOutcome::Aborted(AbortReason::Superseded));
        assert_eq!(first.outcome.error(), Some(ExporterError::AbortedByCaller));
        assert!(second.outcome.is_success());
        assert_eq!(transport.stats().failed, 0);
        assert_eq!(transport.stats().aborted, 1);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_send_leaves_no_in_flight_entry() {
        let client = ScriptedClient::with_latency(vec![], Duration::from_secs(10));
        let transport = Arc::new(transport(client.clone(), 100));

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport.send(&request(URL, 10), SendOptions::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(transport.in_flight(), 1);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert_eq!(transport.in_flight(), 0);
        assert!(!transport.cancel(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_urls_do_not_supersede() {
        let client = ScriptedClient::with_latency(vec![], Duration::from_secs(1));
        let transport = Arc::new(transport(client.clone(), 100));

        let a = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .send(&request("http://a/v1/logs", 10), SendOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let b = transport
            .send(&request("http://b/v1/logs", 10), SendOptions::default())
            .await;
        assert!(b.outcome.is_success());
        assert!(a.await.unwrap().outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let client = ScriptedClient::new(vec![refused(); 10]);
        let transport = Arc::new(transport(client.clone(), 100));

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport.send(&request(URL, 10), SendOptions::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(transport.cancel(URL));
        let report = pending.await.unwrap();
        assert_eq!(report.outcome, SendOutcome::Aborted(AbortReason::Cancelled));
        assert!(!transport.cancel(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_aborts_backoff_when_suppressed() {
        let client = ScriptedClient::new(vec![refused(); 10]);
        let transport = Arc::new(transport(client.clone(), 100));
        let lifecycle = transport.lifecycle().clone();

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .send(
                        &request(URL, 10),
                        SendOptions {
                            suppress_when_hidden: true,
                        },
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        lifecycle.set(LifecycleState::Hidden);
        let report = pending.await.unwrap();
        assert_eq!(report.outcome, SendOutcome::Aborted(AbortReason::Hidden));
        assert_eq!(report.outcome.error(), Some(ExporterError::AbortedByRuntime));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_keeps_retrying_without_suppression() {
        let client = ScriptedClient::new(vec![refused(), refused()]);
        let transport = Arc::new(transport(client.clone(), 100));
        let lifecycle = transport.lifecycle().clone();

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport.send(&request(URL, 10), SendOptions::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        lifecycle.set(LifecycleState::Hidden);

        let report = pending.await.unwrap();
        assert!(report.outcome.is_success());
        assert!(!report.keepalive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_when_hidden_and_small() {
        let client = ScriptedClient::new(vec![status(503)]);
        let transport = transport(client.clone(), 100);
        transport.lifecycle().set(LifecycleState::Hidden);

        let report = transport
            .send(&request(URL, 1024), SendOptions::default())
            .await;
        assert!(report.keepalive);
        assert_eq!(
            report.outcome,
            SendOutcome::Failed(ExporterError::HttpStatus { code: 503 })
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(transport.stats().keepalive, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_payload_skips_keepalive() {
        let client = ScriptedClient::new(vec![status(503)]);
        let transport = transport(client.clone(), 100);
        transport.lifecycle().set(LifecycleState::Hidden);

        let report = transport
            .send(&request(URL, 64 * 1024 + 1), SendOptions::default())
            .await;
        assert!(!report.keepalive);
        assert!(report.outcome.is_success());
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_survives_dropped_caller() {
        let client = ScriptedClient::with_latency(vec![], Duration::from_millis(100));
        let transport = Arc::new(transport(client.clone(), 100));
        transport.lifecycle().set(LifecycleState::Hidden);

        let caller = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport.send(&request(URL, 10), SendOptions::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.calls(), 1);
    }
}
