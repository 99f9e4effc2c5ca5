//! The `http` module provides [`HttpTransport`], which fetches repository
//! files over HTTP(S) using a blocking client.

use crate::transport::{
    Transport, TransportError, TransportErrorKind, TransportRequest, TransportResponse,
    ResponseInfo,
};
use log::{debug, trace};
use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_ENCODING, RANGE};
use reqwest::StatusCode;
use std::time::Duration;

/// Settings for the HTTP client including retry strategy and timeouts.
#[derive(Clone, Copy, Debug)]
pub struct ClientSettings {
    /// Set a timeout for connect, read and write operations.
    pub timeout: Duration,
    /// Set a timeout for only the connect phase.
    pub connect_timeout: Duration,
    /// The total number of times we will try to get the response.
    pub tries: u32,
    /// The pause between the first and second try.
    pub initial_backoff: Duration,
    /// The maximum length of a pause between retries.
    pub max_backoff: Duration,
    /// The exponential backoff factor, the factor by which the pause time will
    /// increase after each try until reaching `max_backoff`.
    pub backoff_factor: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_factor: 1.5,
        }
    }
}

/// An HTTP [`Transport`] with request-level retry logic.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransport {
    settings: ClientSettings,
}

impl HttpTransport {
    /// Create a new `HttpTransport` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `HttpTransport` with specific settings.
    pub fn from_settings(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Transport for HttpTransport {
    /// Sends a GET request for the URL. The request is retried per the
    /// [`ClientSettings`] before the response headers are available; body
    /// read failures surface to the caller.
    fn fetch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        match request.url.scheme() {
            "http" | "https" => {}
            _ => return Err(TransportError::unsupported_scheme(request.url)),
        }

        let client = build_client(&self.settings, &request)?;
        let headers = build_headers(&request)?;

        let mut wait = self.settings.initial_backoff;
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            trace!("GET '{}' (attempt {})", request.url, attempt);
            let result = client
                .get(request.url.clone())
                .headers(headers.clone())
                .send();
            match classify(&request, result) {
                Classified::Done(response) => break response,
                Classified::Fatal(err) => return Err(err),
                Classified::Retryable(err) => {
                    if attempt >= self.settings.tries {
                        return Err(err);
                    }
                    debug!("retrying '{}' after error: {}", request.url, err);
                    std::thread::sleep(wait);
                    wait = multiply_duration(wait, self.settings.backoff_factor)
                        .min(self.settings.max_backoff);
                }
            }
        };

        let info = ResponseInfo {
            accept_ranges_bytes: header_eq(response.headers(), &ACCEPT_RANGES, "bytes"),
            compressed: header_contains(response.headers(), &CONTENT_ENCODING, "gzip"),
        };
        Ok(TransportResponse {
            info,
            body: Box::new(response),
        })
    }
}

enum Classified {
    Done(Response),
    Retryable(TransportError),
    Fatal(TransportError),
}

fn classify(request: &TransportRequest, result: reqwest::Result<Response>) -> Classified {
    let url = request.url.as_str();
    match result {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                Classified::Done(response)
            } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                Classified::Fatal(TransportError::new(
                    TransportErrorKind::FileNotFound,
                    url,
                    format!("HTTP status {}", status),
                ))
            } else if status.is_server_error() {
                Classified::Retryable(TransportError::new(
                    TransportErrorKind::Other,
                    url,
                    format!("HTTP status {}", status),
                ))
            } else {
                Classified::Fatal(TransportError::new(
                    TransportErrorKind::Other,
                    url,
                    format!("HTTP status {}", status),
                ))
            }
        }
        Err(e) => Classified::Retryable(TransportError::new(TransportErrorKind::Other, url, e)),
    }
}

fn build_client(
    settings: &ClientSettings,
    request: &TransportRequest,
) -> Result<Client, TransportError> {
    ClientBuilder::new()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        // Transparent decompression is only wanted when the engine allowed
        // compression on this request; the engine always sees decompressed
        // bytes either way.
        .gzip(request.flags.accept_compression && request.range.is_none())
        .build()
        .map_err(|e| TransportError::new(TransportErrorKind::Other, &request.url, e))
}

fn build_headers(request: &TransportRequest) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();

    let mut cache_control = Vec::new();
    if request.flags.max_age_zero {
        cache_control.push("max-age=0");
    }
    if request.flags.no_transform {
        cache_control.push("no-transform");
    }
    if !cache_control.is_empty() {
        headers.insert(
            CACHE_CONTROL,
            header_value(&cache_control.join(", "), &request.url)?,
        );
    }

    if let Some(range) = request.range {
        // Compression is never combined with ranges; the range addresses the
        // stored (decompressed) representation.
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(
            RANGE,
            header_value(
                &format!("bytes={}-{}", range.from, range.to.saturating_sub(1)),
                &request.url,
            )?,
        );
    } else if !request.flags.accept_compression {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }

    Ok(headers)
}

fn header_value(value: &str, url: &url::Url) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::new(TransportErrorKind::Other, url.as_str(), e))
}

fn header_eq(headers: &HeaderMap, name: &reqwest::header::HeaderName, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

fn header_contains(headers: &HeaderMap, name: &reqwest::header::HeaderName, needle: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains(needle))
        .unwrap_or(false)
}

fn multiply_duration(duration: Duration, factor: f32) -> Duration {
    duration.mul_f32(factor.max(1.0))
}
