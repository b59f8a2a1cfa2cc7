//! HTTP Client Abstraction
//!
//! Provides blocking range-request streaming with retry policy support. The
//! streaming engine runs on plain OS threads, so the contract is synchronous:
//! adapters backed by an async client are expected to bridge internally.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    /// Request every byte from `offset` to the end of the resource.
    pub fn range_from(self, offset: u64) -> Self {
        self.header("Range", format!("bytes={}-", offset))
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Streaming HTTP response.
///
/// The body is handed out as a blocking reader so that a producer thread can
/// pull it chunk by chunk.
pub struct StreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Box<dyn Read + Send>,
    /// Cancelling this token unblocks a pending body read, which then fails or
    /// reports end of stream. `None` when the body cannot be interrupted.
    pub cancel: Option<CancellationToken>,
}

impl StreamResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            headers,
            body,
            cancel: None,
        }
    }

    /// Attach the token that aborts the body.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Value of the `Content-Length` header, when present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|value| value.trim().parse().ok())
    }

    /// Total resource size advertised by a `Content-Range: bytes a-b/total` header.
    pub fn content_range_total(&self) -> Option<u64> {
        let value = self.header("Content-Range")?;
        let (_, total) = value.rsplit_once('/')?;
        total.trim().parse().ok()
    }

    /// Value of the `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given 1-based failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }
}

/// Blocking HTTP client trait
///
/// Implementations should handle:
/// - TLS certificate validation
/// - Connection pooling and keep-alive
/// - Retry of transient failures according to their own policy
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
///
/// fn open_tail(client: &dyn HttpClient, offset: u64) -> Result<StreamResponse> {
///     let request = HttpRequest::new(HttpMethod::Get, "https://cdn.example.com/clip.mp4")
///         .range_from(offset);
///     client.download_stream(request)
/// }
/// ```
pub trait HttpClient: Send + Sync {
    /// Send the request and hand back the response head plus a body reader.
    ///
    /// Non-2xx statuses are returned as responses, not errors, so callers can
    /// interpret range semantics (`206`, `416`) themselves.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Request times out
    fn download_stream(&self, request: HttpRequest) -> Result<StreamResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn response(headers: &[(&str, &str)]) -> StreamResponse {
        StreamResponse::new(
            206,
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Box::new(Cursor::new(Vec::new())),
        )
    }

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::new(HttpMethod::Get, "https://example.com")
            .header("User-Agent", "test")
            .bearer_token("secret")
            .range_from(4096)
            .timeout(Duration::from_secs(30));

        assert_eq!(request.url, "https://example.com");
        assert_eq!(request.headers.get("User-Agent"), Some(&"test".to_string()));
        assert!(request.headers.contains_key("Authorization"));
        assert_eq!(request.header_value("range"), Some("bytes=4096-"));
    }

    #[test]
    fn test_stream_response_headers() {
        let response = response(&[
            ("content-range", "bytes 100-999/1000"),
            ("Content-Length", "900"),
            ("content-type", "video/mp4"),
        ]);

        assert!(response.is_success());
        assert_eq!(response.content_range_total(), Some(1000));
        assert_eq!(response.content_length(), Some(900));
        assert_eq!(response.content_type(), Some("video/mp4"));
    }

    #[test]
    fn test_unknown_content_range_total() {
        let response = response(&[("Content-Range", "bytes 0-99/*")]);
        assert_eq!(response.content_range_total(), None);
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            use_exponential_backoff: true,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
    }
}
