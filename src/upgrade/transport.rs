//! HTTP transport with bounded retry and exponential backoff.
//!
//! All network traffic of the upgrade engine goes through the [`HttpClient`]
//! seam. [`ReqwestClient`] is the production implementation; tests plug in a
//! scripted client instead.
//!
//! [`ResilientTransport`] wraps a client and retries transient failures:
//! network-level errors, HTTP 429 and HTTP 5xx. Every other status is handed
//! back to the caller untouched, so a 404 is returned on the first attempt.

use crate::constants::{
    CONNECT_TIMEOUT, DOWNLOAD_BASE_DELAY_MS, DOWNLOAD_RETRIES, MAX_JITTER_MS,
    METADATA_BASE_DELAY_MS, METADATA_RETRIES, USER_AGENT,
};
use crate::core::error::{UpgradeError, is_retryable_status};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

/// Accepts both GitHub API JSON and raw release assets.
const ACCEPT: &str = "application/vnd.github+json, application/octet-stream;q=0.9, */*;q=0.8";

/// Failure below the HTTP semantics layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection reset, DNS failure, TLS failure, timeout, or a body stream
    /// that broke off mid-transfer.
    #[error("network error for {url}: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Error description including its source chain.
        message: String,
    },

    /// A retryable status (429 or 5xx) that persisted through every retry.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Last status received.
        status: u16,
    },
}

impl TransportError {
    /// Build a [`TransportError::Network`] from any error, keeping its source chain.
    pub fn network(url: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Network {
            url: url.to_string(),
            message,
        }
    }

    /// Whether retrying may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => is_retryable_status(*status),
        }
    }
}

/// Errors that know whether they are worth retrying.
pub trait Retryable {
    /// `true` when the failed operation may succeed on another attempt.
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        TransportError::is_retryable(self)
    }
}

impl Retryable for UpgradeError {
    fn is_retryable(&self) -> bool {
        UpgradeError::is_retryable(self)
    }
}

/// A GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Byte offset for a `Range: bytes=<offset>-` header.
    pub range_start: Option<u64>,
    /// Whole-request timeout. `None` leaves only the connect timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// A plain GET for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range_start: None,
            timeout: None,
        }
    }

    /// Ask the server for the bytes starting at `offset`.
    #[must_use]
    pub fn with_range_start(mut self, offset: u64) -> Self {
        self.range_start = Some(offset);
        self
    }

    /// Bound the whole request, body included.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Status plus a streaming body.
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of `Content-Length`, when the server sent one.
    pub content_length: Option<u64>,
    /// First byte position of `Content-Range`, when the server sent one.
    pub content_range_start: Option<u64>,
    /// Response body chunks.
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl HttpResponse {
    /// A response with an in-memory body.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let content_length = Some(body.len() as u64);
        Self {
            status,
            content_length,
            content_range_start: None,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Collect the whole body into memory.
    pub async fn bytes(self) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::with_capacity(self.content_length.unwrap_or(0) as usize);
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range_start", &self.content_range_start)
            .finish_non_exhaustive()
    }
}

/// Sends a single HTTP request, without retrying.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send `request` and return the response head with a streaming body.
    ///
    /// Only failures to obtain a response are errors; every HTTP status,
    /// including 4xx and 5xx, comes back as `Ok`.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for std::sync::Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

/// [`HttpClient`] backed by `reqwest` with rustls.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Build a client with the selfup user agent and the default connect timeout.
    pub fn new() -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, reqwest::header::HeaderValue::from_static(ACCEPT));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        if let Some(offset) = request.range_start {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response =
            builder.send().await.map_err(|err| TransportError::network(&request.url, &err))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_range_start = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_start);
        let url = request.url;
        let body = response
            .bytes_stream()
            .map_err(move |err| TransportError::network(&url, &err))
            .boxed();

        Ok(HttpResponse {
            status,
            content_length,
            content_range_start,
            body,
        })
    }
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<len>` value.
pub fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

/// How often and how patiently to retry.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)` plus a
/// random jitter in `0..=max_jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of the random jitter.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// A policy with the default jitter.
    #[must_use]
    pub const fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
            max_jitter: Duration::from_millis(MAX_JITTER_MS),
        }
    }

    /// Policy for release-index, manifest and signature requests.
    #[must_use]
    pub const fn metadata() -> Self {
        Self::new(METADATA_RETRIES, Duration::from_millis(METADATA_BASE_DELAY_MS))
    }

    /// Policy for asset downloads.
    #[must_use]
    pub const fn download() -> Self {
        Self::new(DOWNLOAD_RETRIES, Duration::from_millis(DOWNLOAD_BASE_DELAY_MS))
    }

    /// No delay and no jitter; used by tests that exercise retry counts.
    #[must_use]
    pub const fn immediate(retries: u32) -> Self {
        Self {
            retries,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay before retry `attempt` (1-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// The sequence of sleeps between attempts, jitter included.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let policy = *self;
        (1..=policy.retries).map(move |attempt| policy.backoff_delay(attempt) + policy.jitter())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::metadata()
    }
}

/// An [`HttpClient`] plus a retry policy.
pub struct ResilientTransport<C> {
    client: C,
    policy: RetryPolicy,
}

impl<C: HttpClient> ResilientTransport<C> {
    /// Wrap `client`, retrying according to `policy`.
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// The wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Send `request` with the default policy.
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.request_with(self.policy, request).await
    }

    /// Send `request`, retrying network errors, 429 and 5xx under `policy`.
    ///
    /// Exhausting the retries returns the last error. A retryable status that
    /// persists becomes [`TransportError::Status`].
    pub async fn request_with(
        &self,
        policy: RetryPolicy,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let client = &self.client;
        let request = &request;
        self.retry(policy, || async move {
            let response = client.send(request.clone()).await?;
            if is_retryable_status(response.status) {
                return Err(TransportError::Status {
                    url: request.url.clone(),
                    status: response.status,
                });
            }
            Ok(response)
        })
        .await
    }

    /// Send `request` and collect the whole body under the default policy.
    ///
    /// Like [`request_with`](Self::request_with), but a body that breaks off
    /// mid-transfer is retried as well. Returns the final status with the body.
    pub async fn get_bytes(&self, request: HttpRequest) -> Result<(u16, Vec<u8>), TransportError> {
        let client = &self.client;
        let request = &request;
        self.retry(self.policy, || async move {
            let response = client.send(request.clone()).await?;
            let status = response.status;
            if is_retryable_status(status) {
                return Err(TransportError::Status {
                    url: request.url.clone(),
                    status,
                });
            }
            Ok((status, response.bytes().await?))
        })
        .await
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `policy` runs out of retries.
    pub async fn retry<T, E, F, Fut>(&self, policy: RetryPolicy, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempt = 0u32;
        RetryIf::spawn(policy.schedule(), operation, |err: &E| {
            attempt += 1;
            let retry = err.is_retryable() && attempt <= policy.retries;
            if retry {
                warn!(attempt, retries = policy.retries, error = %err, "Transient failure, retrying");
            } else {
                debug!(error = %err, "Not retrying");
            }
            retry
        })
        .await
    }
}
