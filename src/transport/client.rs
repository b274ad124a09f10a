// src/transport/client.rs
//! HTTP client seam
//!
//! The transport only needs "POST these bytes, tell me the status". Anything
//! that fails before a status arrives is a connection error.

use crate::export::request::ExportRequest;
use crate::utils::errors::{ExporterError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Status of a completed HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// POST the request; `Err` only for failures without a response
    async fn post(&self, request: &ExportRequest) -> Result<HttpResponse>;
}

/// Pooled hyper client
pub struct HyperHttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
    user_agent: String,
}

impl HyperHttpClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            client,
            timeout,
            user_agent: format!("logship/{}", crate::VERSION),
        }
    }

    fn build_request(&self, request: &ExportRequest) -> Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(request.url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, self.user_agent.as_str());

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ExporterError::Connection(format!("Invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ExporterError::Connection(format!("Invalid header value: {}", e))
            })?;
            builder = builder.header(name, value);
        }

        builder
            .body(Full::new(Bytes::from(request.payload.clone())))
            .map_err(|e| ExporterError::Connection(format!("Request build error: {}", e)))
    }
}

#[async_trait]
impl HttpClient for HyperHttpClient {
    async fn post(&self, request: &ExportRequest) -> Result<HttpResponse> {
        let http_request = self.build_request(request)?;

        debug!(
            "POST {} ({} bytes, request {})",
            request.url,
            request.payload.len(),
            request.request_id
        );

        let exchange = async {
            let response = self.client.request(http_request).await.map_err(|e| {
                ExporterError::Connection(format!("Request failed: {}", e))
            })?;

            let status = response.status().as_u16();
            // Drain the body so the connection can go back to the pool
            response.into_body().collect().await.map_err(|e| {
                ExporterError::Connection(format!("Response body error: {}", e))
            })?;

            Ok::<_, ExporterError>(HttpResponse { status })
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                ExporterError::Connection(format!("Request timed out after {:?}", self.timeout))
            })?
    }
}
