use dyn_clone::DynClone;
use snafu::Snafu;
use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use url::Url;

/// A half-open byte range, `from` inclusive and `to` exclusive, in bytes of
/// the decompressed representation of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte of the range.
    pub from: u64,
    /// One past the last byte of the range.
    pub to: u64,
}

impl ByteRange {
    /// The number of bytes the range covers.
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flags the update engine may set on a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// Ask intermediate caches to revalidate (`Cache-Control: max-age=0`).
    /// Set when retrying after a verification failure.
    pub max_age_zero: bool,
    /// Forbid intermediate transformations (`Cache-Control: no-transform`).
    pub no_transform: bool,
    /// Allow transport-level compression. Never set together with a range.
    pub accept_compression: bool,
}

/// A request for a file, or a byte range of one.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// The URL to fetch.
    pub url: Url,
    /// The byte range to fetch, or the whole file when `None`.
    pub range: Option<ByteRange>,
    /// Request flags.
    pub flags: RequestFlags,
}

/// Capabilities and properties the server reported on a response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseInfo {
    /// The server advertised `Accept-Ranges: bytes`.
    pub accept_ranges_bytes: bool,
    /// The body was transferred compressed. The transport has already
    /// decompressed it; readers always see decompressed bytes.
    pub compressed: bool,
}

/// A response: the server's reported capabilities plus a blocking body
/// reader. Each `read` call yields a chunk of bytes, with `Ok(0)` signalling
/// the end of the body.
pub struct TransportResponse {
    /// What the server reported about itself.
    pub info: ResponseInfo,
    /// The (decompressed) body.
    pub body: Box<dyn Read + Send>,
}

impl Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("info", &self.info)
            .finish()
    }
}

/// A trait to abstract over the method/protocol by which files are obtained.
///
/// Implementations present a blocking, sequential API: `fetch` returns once
/// response headers are available, and the body is consumed by pulling on the
/// returned reader.
pub trait Transport: Debug + DynClone {
    /// Opens the file (or byte range) named by `request` for reading.
    fn fetch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

// Implement `Clone` for `Transport` trait objects.
dyn_clone::clone_trait_object!(Transport);

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The kind of error that the transport object experienced during `fetch`.
#[derive(Debug, Copy, Clone)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The trait does not handle the URL scheme named in the request, e.g.
    /// `file://` or `http://`.
    UnsupportedUrlScheme,
    /// The file cannot be found.
    FileNotFound,
    /// The transport failed for any other reason, e.g. IO error, HTTP broken
    /// pipe, etc.
    Other,
}

/// The error type that [`Transport`] `fetch` returns.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(display("{:?} error fetching '{}': {}", kind, url, source))]
pub struct TransportError {
    /// The kind of error that occurred.
    pub kind: TransportErrorKind,
    /// The URL that the transport was trying to fetch.
    pub url: String,
    /// The underlying error that occurred.
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    /// Creates a new [`TransportError`].
    pub fn new<S, E>(kind: TransportErrorKind, url: S, source_error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        S: AsRef<str>,
    {
        Self {
            kind,
            url: url.as_ref().into(),
            source: source_error.into(),
        }
    }

    /// Creates a [`TransportError`] for reporting an unhandled URL type.
    pub fn unsupported_scheme<S: AsRef<str>>(url: S) -> Self {
        TransportError::new(
            TransportErrorKind::UnsupportedUrlScheme,
            url,
            "Transport cannot handle the given URL scheme.".to_string(),
        )
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Provides a [`Transport`] for local files. Byte ranges are served by
/// seeking, so the filesystem always counts as supporting ranges.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemTransport;

impl Transport for FilesystemTransport {
    fn fetch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        if request.url.scheme() != "file" {
            return Err(TransportError::unsupported_scheme(request.url));
        }

        let path = request
            .url
            .to_file_path()
            .map_err(|()| TransportError::unsupported_scheme(&request.url))?;

        let mut file = File::open(path).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound => TransportErrorKind::FileNotFound,
                _ => TransportErrorKind::Other,
            };
            TransportError::new(kind, &request.url, e)
        })?;

        let body: Box<dyn Read + Send> = match request.range {
            None => Box::new(file),
            Some(range) => {
                file.seek(SeekFrom::Start(range.from))
                    .map_err(|e| TransportError::new(TransportErrorKind::Other, &request.url, e))?;
                Box::new(file.take(range.len()))
            }
        };

        Ok(TransportResponse {
            info: ResponseInfo {
                accept_ranges_bytes: true,
                compressed: false,
            },
            body,
        })
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A Transport that provides support for both local files and, if the `http`
/// feature is enabled, HTTP-transported files.
#[derive(Debug, Clone, Copy)]
pub struct DefaultTransport {
    file: FilesystemTransport,
    #[cfg(feature = "http")]
    http: crate::http::HttpTransport,
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self {
            file: FilesystemTransport,
            #[cfg(feature = "http")]
            http: crate::http::HttpTransport::default(),
        }
    }
}

impl DefaultTransport {
    /// Creates a new `DefaultTransport`. Same as `default()`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "http")]
impl DefaultTransport {
    /// Create a new `DefaultTransport` using the given HTTP `ClientSettings`.
    pub fn from_http_settings(settings: crate::http::ClientSettings) -> Self {
        Self {
            file: FilesystemTransport,
            http: crate::http::HttpTransport::from_settings(settings),
        }
    }
}

impl Transport for DefaultTransport {
    fn fetch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        match request.url.scheme() {
            "file" => self.file.fetch(request),
            "http" | "https" => self.handle_http(request),
            _ => Err(TransportError::unsupported_scheme(request.url)),
        }
    }
}

impl DefaultTransport {
    #[cfg(not(feature = "http"))]
    #[allow(clippy::trivially_copy_pass_by_ref, clippy::unused_self)]
    fn handle_http(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        Err(TransportError::new(
            TransportErrorKind::UnsupportedUrlScheme,
            request.url,
            "The library was not compiled with the http feature enabled.",
        ))
    }

    #[cfg(feature = "http")]
    fn handle_http(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.http.fetch(request)
    }
}
