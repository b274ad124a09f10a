// src/transport/mod.rs
//! Delivery of export requests to the collector
//!
//! - **Client**: `HttpClient` seam and the pooled hyper implementation
//! - **Sender**: per-request retry state machine with per-URL superseding
//! - **Backoff**: exponential wait schedule and retryable statuses
//! - **Lifecycle**: host visibility signal driving keepalive sends
//!
//! # Retry budget
//!
//! - **Connection failures**: up to `retry_count` retries (default 100)
//! - **Retryable HTTP status** (408, 429, 5xx gateway errors): 3 attempts total
//! - **Wait before attempt n**: `retry_interval × 2^(n-1)`, capped at 60s

pub mod backoff;
pub mod client;
pub mod lifecycle;
pub mod sender;

pub use backoff::RetryPolicy;
pub use client::{HttpClient, HttpResponse, HyperHttpClient};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use sender::{
    AbortReason, RequestState, SendOptions, SendOutcome, SendReport, Transport, TransportConfig,
    TransportStats,
};
