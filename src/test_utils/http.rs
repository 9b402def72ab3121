//! Scripted [`HttpClient`] for tests.
//!
//! Responses are registered per URL and served in order. The last response
//! registered for a URL is sticky: once the queue is down to one entry it is
//! served for every further request. Unregistered URLs answer 404.

use crate::upgrade::transport::{HttpClient, HttpRequest, HttpResponse, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Body chunk size for streamed responses.
const CHUNK_SIZE: usize = 1024;

/// A request as seen by [`MockHttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Requested URL.
    pub url: String,
    /// Offset of the `Range` header, if any.
    pub range_start: Option<u64>,
}

/// A canned response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Fixed status and body; any `Range` header is ignored.
    Fixed {
        /// Status code.
        status: u16,
        /// Body bytes.
        body: Vec<u8>,
    },
    /// A file served with range support.
    ///
    /// Answers 206 with the tail for an in-bounds range, 416 for a range at
    /// or past the end, and 200 otherwise. With `cut_at`, the body stream
    /// breaks off with a network error at that absolute byte offset.
    Ranged {
        /// Complete file contents.
        body: Vec<u8>,
        /// Absolute offset where the connection drops.
        cut_at: Option<usize>,
    },
    /// 206 whose `Content-Range` starts at `range_start`, whatever was asked for.
    Partial {
        /// Reported first byte position; `None` omits the header.
        range_start: Option<u64>,
        /// Body bytes.
        body: Vec<u8>,
    },
    /// Fail before any response is received.
    NetworkError,
}

impl MockResponse {
    /// 200 with `body`.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::Fixed {
            status: 200,
            body: body.into(),
        }
    }

    /// `status` with an empty body.
    pub fn status(status: u16) -> Self {
        Self::Fixed {
            status,
            body: Vec::new(),
        }
    }

    /// 200 with `value` serialized as JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::ok(value.to_string().into_bytes())
    }

    /// A range-aware file download.
    pub fn asset(body: impl Into<Vec<u8>>) -> Self {
        Self::Ranged {
            body: body.into(),
            cut_at: None,
        }
    }

    /// A range-aware download whose connection drops at `cut_at`.
    pub fn interrupted(body: impl Into<Vec<u8>>, cut_at: usize) -> Self {
        Self::Ranged {
            body: body.into(),
            cut_at: Some(cut_at),
        }
    }

    /// A 206 reporting `range_start` in its `Content-Range`.
    pub fn partial(range_start: Option<u64>, body: impl Into<Vec<u8>>) -> Self {
        Self::Partial {
            range_start,
            body: body.into(),
        }
    }

    /// A connection failure.
    pub fn network_error() -> Self {
        Self::NetworkError
    }

    fn respond(self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        match self {
            Self::Fixed { status, body } => Ok(HttpResponse::from_bytes(status, body)),
            Self::Partial { range_start, body } => {
                let mut response = HttpResponse::from_bytes(206, body);
                response.content_range_start = range_start;
                Ok(response)
            }
            Self::NetworkError => Err(TransportError::Network {
                url: request.url.clone(),
                message: "connection refused".to_string(),
            }),
            Self::Ranged { body, cut_at } => {
                let len = body.len();
                let offset = usize::try_from(request.range_start.unwrap_or(0)).unwrap_or(usize::MAX);
                if offset > 0 && offset >= len {
                    return Ok(HttpResponse::from_bytes(416, Vec::new()));
                }

                let status = if offset > 0 { 206 } else { 200 };
                let end = cut_at.map_or(len, |cut| cut.clamp(offset, len));
                let mut chunks: Vec<Result<Bytes, TransportError>> = body[offset..end]
                    .chunks(CHUNK_SIZE)
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                if cut_at.is_some() {
                    chunks.push(Err(TransportError::Network {
                        url: request.url.clone(),
                        message: "connection reset by peer".to_string(),
                    }));
                }

                Ok(HttpResponse {
                    status,
                    content_length: Some((len - offset) as u64),
                    content_range_start: (status == 206).then_some(offset as u64),
                    body: futures::stream::iter(chunks).boxed(),
                })
            }
        }
    }
}

/// An [`HttpClient`] that serves registered responses and records requests.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    routes: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpClient {
    /// A client with no routes; every request answers 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for `url`.
    pub fn on(&self, url: impl Into<String>, response: MockResponse) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Requests received for `url`.
    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }

    fn next_response(&self, url: &str) -> Option<MockResponse> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = routes.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                url: request.url.clone(),
                range_start: request.range_start,
            });

        match self.next_response(&request.url) {
            Some(response) => response.respond(&request),
            None => Ok(HttpResponse::from_bytes(404, Vec::new())),
        }
    }
}
