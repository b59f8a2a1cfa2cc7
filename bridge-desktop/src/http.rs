//! HTTP Client Implementation using Reqwest
//!
//! Blocking adapter over the async `reqwest` client. Requests run on a small
//! private Tokio runtime; response bodies are bridged into `std::io::Read` so
//! a downloader thread can pull them chunk by chunk. Each body carries a
//! cancellation token that ends a pending read early.

use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy, StreamResponse},
};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reqwest-based HTTP client implementation
///
/// Provides range-request streaming with:
/// - Connection pooling via reqwest
/// - Retry of connection failures and `5xx`/`429` responses with exponential backoff
/// - TLS support by default
///
/// Must not be called from inside an async runtime; the streaming engine
/// calls it from plain threads.
pub struct ReqwestHttpClient {
    client: Client,
    runtime: Arc<Runtime>,
    retry: RetryPolicy,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_retry_policy(RetryPolicy::default())
    }

    /// Create a new HTTP client with a custom retry policy
    pub fn with_retry_policy(retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("netstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Self::with_client(client, retry)
    }

    /// Wrap a preconfigured reqwest client
    pub fn with_client(client: Client, retry: RetryPolicy) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("netstream-http")
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            runtime: Arc::new(runtime),
            retry,
        })
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        // Covers the whole body, so only set it for bounded requests.
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    fn into_stream_response(&self, response: reqwest::Response) -> StreamResponse {
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        // A cancelled body reports end of stream on its next poll.
        let cancel = CancellationToken::new();
        let stream = response
            .bytes_stream()
            .map_err(io::Error::other)
            .take_until(cancel.clone().cancelled_owned())
            .boxed();
        let reader = SyncIoBridge::new_with_handle(
            StreamReader::new(stream),
            self.runtime.handle().clone(),
        );

        let body = BlockingBody {
            reader: Box::new(reader),
            _runtime: Arc::clone(&self.runtime),
        };
        StreamResponse::new(status, headers, Box::new(body)).with_cancel(cancel)
    }
}

impl HttpClient for ReqwestHttpClient {
    fn download_stream(&self, request: HttpRequest) -> Result<StreamResponse> {
        let policy = &self.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!(
                attempt,
                max_attempts,
                url = %request.url,
                range = ?request.header_value("Range"),
                "Opening HTTP stream"
            );

            match self.runtime.block_on(self.build_request(&request).send()) {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retryable = status >= 500 || status == 429;

                    if !retryable || attempt == max_attempts {
                        return Ok(self.into_stream_response(response));
                    }

                    warn!(status, attempt, "HTTP request failed with retryable status");
                    last_error = Some(BridgeError::HttpStatus {
                        status,
                        message: response
                            .status()
                            .canonical_reason()
                            .unwrap_or("retryable status")
                            .to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, attempt, "HTTP request failed");

                    last_error = Some(if e.is_timeout() {
                        BridgeError::OperationFailed("Request timed out".to_string())
                    } else if e.is_connect() {
                        BridgeError::OperationFailed(format!("Connection failed: {}", e))
                    } else {
                        BridgeError::OperationFailed(e.to_string())
                    });
                }
            }

            if attempt < max_attempts {
                let delay = policy.delay_for_attempt(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
                thread::sleep(delay);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BridgeError::OperationFailed("All retry attempts exhausted".to_string())
        }))
    }
}

/// Response body reader. Keeps the runtime that drives it alive.
struct BlockingBody {
    reader: Box<dyn Read + Send>,
    _runtime: Arc<Runtime>,
}

impl Read for BlockingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Serve one canned response per accepted connection and return the
    /// request heads seen.
    fn serve(responses: Vec<&'static str>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/track.mp3", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let mut heads = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut head = String::new();
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    head.push_str(&line);
                }
                heads.push(head);
                stream.write_all(response.as_bytes()).unwrap();
            }
            heads
        });

        (url, handle)
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            use_exponential_backoff: false,
        }
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Get),
            reqwest::Method::GET
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Head),
            reqwest::Method::HEAD
        );
    }

    #[test]
    fn test_range_request_streams_body() {
        let (url, server) = serve(vec![
            "HTTP/1.1 206 Partial Content\r\n\
             Content-Type: audio/mpeg\r\n\
             Content-Length: 5\r\n\
             Content-Range: bytes 10-14/15\r\n\
             Connection: close\r\n\r\nhello",
        ]);

        let client = ReqwestHttpClient::with_retry_policy(quick_retry()).unwrap();
        let mut response = client
            .download_stream(HttpRequest::new(HttpMethod::Get, url).range_from(10))
            .unwrap();

        assert_eq!(response.status, 206);
        assert_eq!(response.content_type(), Some("audio/mpeg"));
        assert_eq!(response.content_range_total(), Some(15));

        let mut body = String::new();
        response.body.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello");

        let heads = server.join().unwrap();
        assert!(heads[0].to_ascii_lowercase().contains("range: bytes=10-"));
    }

    #[test]
    fn test_retries_server_errors_then_returns_last_response() {
        let unavailable = "HTTP/1.1 503 Service Unavailable\r\n\
                           Content-Length: 0\r\n\
                           Connection: close\r\n\r\n";
        let (url, server) = serve(vec![unavailable, unavailable]);

        let client = ReqwestHttpClient::with_retry_policy(quick_retry()).unwrap();
        let response = client
            .download_stream(HttpRequest::new(HttpMethod::Get, url))
            .unwrap();

        assert_eq!(response.status, 503);
        assert!(response.is_server_error());
        assert_eq!(server.join().unwrap().len(), 2);
    }

    #[test]
    fn test_cancel_unblocks_a_stalled_body() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/track.mp3", listener.local_addr().unwrap());

        // Sends part of the body, then holds the socket open.
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc")
                .unwrap();
            thread::sleep(Duration::from_secs(5));
        });

        let client = ReqwestHttpClient::with_retry_policy(quick_retry()).unwrap();
        let mut response = client
            .download_stream(HttpRequest::new(HttpMethod::Get, url))
            .unwrap();
        let cancel = response.cancel.clone().unwrap();

        let mut first = [0u8; 3];
        response.body.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"abc");

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let mut buf = [0u8; 16];
        let read = response.body.read(&mut buf).unwrap();
        canceller.join().unwrap();

        assert_eq!(read, 0);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_connection_failure_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/gone", listener.local_addr().unwrap());
        drop(listener);

        let client = ReqwestHttpClient::with_retry_policy(quick_retry()).unwrap();
        let result = client.download_stream(HttpRequest::new(HttpMethod::Get, url));

        assert!(matches!(result, Err(BridgeError::OperationFailed(_))));
    }
}
