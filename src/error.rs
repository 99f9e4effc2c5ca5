// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The errors surfaced by the update client.

use crate::transport::TransportError;
use snafu::Snafu;
use std::fmt;
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type reported to callers of this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A metadata file, the index, or a package failed verification. See
    /// [`VerificationError`] for the specific failure.
    #[snafu(context(false))]
    #[snafu(display("{}", source))]
    Verification {
        /// The underlying verification failure.
        source: VerificationError,
    },

    /// A file could not be fetched from any configured mirror. Holds the error
    /// reported by the transport for the last mirror tried.
    #[snafu(display("Failed to fetch '{}': {}", path, source))]
    Remote {
        /// The repository-relative path being fetched.
        path: String,
        /// The transport's native error.
        source: TransportError,
    },

    /// The requested package is not present in the repository index.
    #[snafu(display("Package '{}' is not known to the repository", package))]
    InvalidPackage {
        /// The package that was requested.
        package: String,
    },

    /// A file in the local cache no longer parses or reads back correctly.
    #[snafu(display("Cached file '{}' is corrupted: {}", path.display(), detail))]
    LocalFileCorrupted {
        /// The cache path of the corrupted file.
        path: PathBuf,
        /// What went wrong reading it.
        detail: String,
    },

    /// The cache holds no trusted root; `Client::bootstrap` must run first.
    #[snafu(display("No trusted root in the cache; bootstrap is required"))]
    NoTrustedRoot,

    /// An I/O failure while reading or writing the cache.
    #[snafu(display("Cache I/O failed for '{}': {}", path.display(), source))]
    CacheIo {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A configured mirror or repository URL failed to parse.
    #[snafu(display("Failed to parse URL '{}': {}", url, source))]
    ParseUrl {
        /// The URL that failed to parse.
        url: String,
        /// The underlying parse error.
        source: url::ParseError,
    },

    /// A repository path could not be joined onto a mirror's base URL.
    #[snafu(display("Failed to join '{}' to URL '{}': {}", path, url, source))]
    JoinUrl {
        /// The path being joined.
        path: String,
        /// The base URL.
        url: url::Url,
        /// The underlying parse error.
        source: url::ParseError,
    },

    /// Internal error: a download was attempted outside of a mirror scope.
    #[snafu(display("Internal error: no mirror is selected"))]
    NoMirrorSelected,

    /// Neither the caller nor the trusted mirror list provides any mirrors.
    #[snafu(display("No mirrors are configured"))]
    NoMirrorsConfigured,
}

/// The ways verification of a downloaded or cached file can fail.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum VerificationError {
    /// The metadata's expiry is not later than the caller-supplied time.
    #[snafu(display("Metadata '{}' has expired", path))]
    Expired {
        /// The repository-relative path of the metadata.
        path: String,
    },

    /// The metadata's version went backwards with respect to the trusted copy.
    #[snafu(display("Metadata '{}' has version {}, expected at least {}", path, got, min))]
    VersionTooLow {
        /// The repository-relative path of the metadata.
        path: String,
        /// The version the new metadata carries.
        got: u64,
        /// The lowest acceptable version.
        min: u64,
    },

    /// Fewer distinct valid signatures than the role's threshold requires.
    #[snafu(display("Metadata '{}' is not signed by enough trusted keys", path))]
    SignaturesMissing {
        /// The repository-relative path of the metadata.
        path: String,
    },

    /// More than one valid signature was made by the same key.
    #[snafu(display("Metadata '{}' carries duplicate signatures from one key", path))]
    SignaturesNotUnique {
        /// The repository-relative path of the metadata.
        path: String,
    },

    /// A signature names a key ID that the trusted key table does not contain.
    #[snafu(display("Signature on '{}' uses unknown key '{}'", path, keyid))]
    UnknownKey {
        /// The repository-relative path of the metadata.
        path: String,
        /// The unrecognized key ID.
        keyid: String,
    },

    /// A file's length or hashes do not match its signed file info.
    #[snafu(display("File '{}' does not match its signed length and hashes", path))]
    FileInfoMismatch {
        /// The repository-relative path of the file.
        path: String,
    },

    /// A download exceeded the expected size and was aborted.
    #[snafu(display("File '{}' exceeded the size bound of {} bytes ({})", path, limit, specifier))]
    FileTooLarge {
        /// The repository-relative path of the file.
        path: String,
        /// The bound that was exceeded.
        limit: u64,
        /// Where the bound came from.
        specifier: &'static str,
    },

    /// The file's bytes could not be parsed as the expected metadata.
    #[snafu(display("Failed to parse metadata '{}' ({}): {}", path, kind, detail))]
    Deserialization {
        /// The repository-relative path of the metadata.
        path: String,
        /// Whether the JSON itself or the schema was at fault.
        kind: DeserializationKind,
        /// The parser's message.
        detail: String,
    },

    /// The named target does not appear in the relevant targets metadata.
    #[snafu(display("Target '{}' is not listed in the targets metadata", path))]
    UnknownTarget {
        /// The target path that was requested.
        path: String,
    },

    /// The update loop kept failing verification without making progress.
    #[snafu(display("Update made no progress after {} attempts", history.len()))]
    Loop {
        /// What happened on each attempt, oldest first.
        history: Vec<UpdateEvent>,
    },
}

/// Distinguishes the two classes of metadata parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeserializationKind {
    /// The bytes are not valid JSON at all.
    MalformedJson,
    /// The JSON is well-formed but does not match the metadata schema.
    SchemaViolation,
}

impl fmt::Display for DeserializationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeserializationKind::MalformedJson => write!(f, "malformed JSON"),
            DeserializationKind::SchemaViolation => write!(f, "schema violation"),
        }
    }
}

/// One entry in the verification history kept by the update loop.
#[derive(Debug)]
#[non_exhaustive]
pub enum UpdateEvent {
    /// The trusted root was replaced and the loop restarted.
    RootUpdated,
    /// An attempt failed verification.
    Verification(VerificationError),
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateEvent::RootUpdated => write!(f, "trusted root updated"),
            UpdateEvent::Verification(e) => write!(f, "{}", e),
        }
    }
}
