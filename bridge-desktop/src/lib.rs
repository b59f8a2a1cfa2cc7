//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, bridged to blocking reads for the
//!   streaming downloader threads
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
//!
//! let client = ReqwestHttpClient::new()?;
//! let response = client.download_stream(
//!     HttpRequest::new(HttpMethod::Get, "https://example.com/track.mp3").range_from(0),
//! )?;
//! ```

mod http;

pub use http::ReqwestHttpClient;
