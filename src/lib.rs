// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Staunch is a client library for package repositories secured with [TUF]-style
//! signed metadata.
//!
//! The client verifies everything it downloads against a chain of trust rooted
//! in a set of out-of-band root key fingerprints: a frequently re-signed
//! timestamp names the current snapshot, the snapshot names the current root,
//! mirror list, and package index, and per-package targets metadata inside the
//! index binds package tarballs to lengths and digests. Downloads become
//! visible in the local cache atomically and only after verification, and the
//! large append-only index archive is extended with byte-range downloads when
//! that is cheaper than refetching it.
//!
//! Delegated (author-level) target signing and partial mirrors are not
//! supported.
//!
//! [TUF]: https://theupdateframework.github.io/
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`. The end-to-end tests
//! under `tests/` build throwaway signed repositories on disk and exercise the
//! client against them over the filesystem transport.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
// missing_docs is on its own line to make it easy to comment out when making changes.
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

mod cache;
pub mod error;
mod fetch;
#[cfg(feature = "http")]
pub mod http;
mod index;
mod io;
pub mod layout;
mod remote;
pub mod schema;
pub mod trust;
mod transport;

use crate::cache::{Cache, CachedRole, Disposition, DownloadFormat, Staging};
use crate::error::{Error, Result, UpdateEvent, VerificationError};
use crate::fetch::SizeBound;
use crate::layout::{CacheLayout, IndexLayout, PackageId, RepoLayout};
use crate::remote::{plan_index_download, IndexDownload, RemoteRepository, ServerCapabilities};
use crate::schema::decoded::Decoded;
use crate::schema::{FileInfo, Mirrors, Role, Root, Snapshot, Targets, Timestamp};
use crate::trust::{Trusted, Verified};
pub use crate::transport::{
    ByteRange, DefaultTransport, FilesystemTransport, RequestFlags, ResponseInfo, Transport,
    TransportError, TransportErrorKind, TransportRequest, TransportResponse,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use snafu::ResultExt;
use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use url::Url;

/// How many times `check_for_updates` restarts after a verification failure
/// before giving up with [`VerificationError::Loop`].
const MAX_ITERATIONS: usize = 5;

/// The outcome of a successful [`Client::check_for_updates`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// New repository content was verified and cached.
    HasUpdates,
    /// The cache already matches the repository.
    NoUpdates,
}

/// Size ceilings used when a file must be downloaded before any signed file
/// info for it is known. These exist to stop an attacker (or a broken server)
/// from feeding the client endless data.
///
/// The [`Default`] implementation sets the following values:
/// * `max_root_size`: 2 MiB
/// * `max_timestamp_size`: 1 MiB
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// The maximum allowable size in bytes for a downloaded root file.
    pub max_root_size: u64,

    /// The maximum allowable size in bytes for a downloaded timestamp file.
    /// The timestamp is the entry point of every update check and never has
    /// prior file info.
    pub max_timestamp_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_root_size: 1024 * 1024 * 2, // 2 MiB
            max_timestamp_size: 1024 * 1024, // 1 MiB
        }
    }
}

/// Client configuration, provided to [`Client::new`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// A directory on a persistent filesystem that holds the trusted
    /// metadata, the package index, and its sidecar. It is created if absent.
    pub cache_dir: PathBuf,

    /// The out-of-band mirror base URLs, in preference order. Mirrors from
    /// the repository's own trusted mirror list are appended to these.
    pub mirrors: Vec<String>,

    /// Where files live in the remote repository.
    pub repo_layout: RepoLayout,

    /// Where files live inside the index archive.
    pub index_layout: IndexLayout,

    /// Where files live in the local cache.
    pub cache_layout: CacheLayout,

    /// Download size ceilings.
    pub limits: Limits,

    /// Always fetch the compressed index archive, even when extending the
    /// local copy with a byte range would be cheaper.
    pub require_compressed_index: bool,
}

impl Settings {
    /// Creates settings with default layouts and limits.
    pub fn new<P: Into<PathBuf>>(cache_dir: P, mirrors: Vec<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            mirrors,
            repo_layout: RepoLayout::default(),
            index_layout: IndexLayout::default(),
            cache_layout: CacheLayout::default(),
            limits: Limits::default(),
            require_compressed_index: false,
        }
    }
}

/// A repository client.
///
/// The client is single-threaded and cooperative: within one call, downloads
/// run strictly in the order dictated by the verification state machine, and
/// the transport presents a blocking, sequential API.
#[derive(Debug)]
pub struct Client {
    transport: Box<dyn Transport>,
    cache: Cache,
    repo_layout: RepoLayout,
    index_layout: IndexLayout,
    mirrors: Vec<Url>,
    limits: Limits,
    require_compressed_index: bool,
    caps: ServerCapabilities,
}

/// First attempt, or a retry after a verification failure? Retries ask
/// intermediate caches to revalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

impl Attempt {
    fn flags(self) -> RequestFlags {
        RequestFlags {
            max_age_zero: self == Attempt::Retry,
            no_transform: true,
            accept_compression: true,
        }
    }
}

/// How `update_once` ends early. `RootUpdated` is pure control flow and never
/// escapes `check_for_updates`.
#[derive(Debug)]
enum Interrupt {
    RootUpdated,
    Verification(VerificationError),
    Fatal(Error),
}

impl From<Error> for Interrupt {
    fn from(e: Error) -> Self {
        match e {
            Error::Verification { source } => Interrupt::Verification(source),
            other => Interrupt::Fatal(other),
        }
    }
}

impl Client {
    /// Creates a client over `transport` with the given settings. Opens the
    /// cache directory, creating it if needed.
    pub fn new(transport: Box<dyn Transport>, settings: Settings) -> Result<Self> {
        let mut mirrors = Vec::new();
        for mirror in &settings.mirrors {
            mirrors.push(parse_url(mirror)?);
        }
        let cache = Cache::open(settings.cache_dir, settings.cache_layout)?;
        Ok(Self {
            transport,
            cache,
            repo_layout: settings.repo_layout,
            index_layout: settings.index_layout,
            mirrors,
            limits: settings.limits,
            require_compressed_index: settings.require_compressed_index,
            caps: ServerCapabilities::new(),
        })
    }

    /// Whether the cache holds no trusted root yet, meaning
    /// [`Client::bootstrap`] must run before anything else.
    pub fn requires_bootstrap(&self) -> bool {
        self.cache.get_cached(CachedRole::Root).is_none()
    }

    /// The version of the currently trusted root.
    pub fn trusted_root_version(&self) -> Result<u64> {
        Ok(self.cache.cached_state()?.root.version().get())
    }

    /// Installs the initial trusted root.
    ///
    /// The root is downloaded from a mirror (bounded by
    /// [`Limits::max_root_size`], with no file info to check against) and
    /// accepted when signatures from at least `threshold` of the supplied
    /// out-of-band key fingerprints check out. A threshold of 0 is
    /// trust-on-first-use. On success the root is installed atomically and
    /// the cached timestamp and snapshot are cleared to force a fresh check.
    pub fn bootstrap(&self, trusted_root_keys: &[Decoded], threshold: u64) -> Result<()> {
        let remote = self.remote();
        let extra = self.cached_mirror_urls()?;
        remote.with_mirror(&extra, || {
            let staging = self.cache.staging()?;
            let path = &self.repo_layout.root_path;
            info!("Downloading {}", path);
            let temp = staging.path_for("root.json");
            remote.fetch_file(
                path,
                SizeBound::Ceiling {
                    limit: self.limits.max_root_size,
                    specifier: "max_root_size",
                },
                Attempt::First.flags(),
                &temp,
            )?;
            let bytes = read_file(&temp)?;
            let _root: Verified<Root> =
                trust::verify_fingerprints(trusted_root_keys, threshold, path, &bytes)
                    .map_err(Error::from)?;
            self.cache.cache_remote_file(
                &temp,
                DownloadFormat::Uncompressed,
                Disposition::CacheAs(CachedRole::Root),
            )?;
            self.cache.clear_cache()?;
            info!("Trusted root installed");
            Ok(())
        })
    }

    /// Checks the repository for updates, verifying and caching everything
    /// that changed.
    ///
    /// When `now` is supplied, metadata freshness is enforced against it;
    /// without it, expiry checking is disabled (for offline use against an
    /// already-fetched repository).
    ///
    /// Within one call: the timestamp is always fetched; when it names a new
    /// snapshot the snapshot is fetched; a root change discovered in the
    /// snapshot replaces the root and restarts the check; changed mirror
    /// lists and index archives are fetched last. Verification failures
    /// restart the check (refreshing the trusted root first) up to a bounded
    /// number of times before surfacing as [`VerificationError::Loop`].
    pub fn check_for_updates(&self, now: Option<DateTime<Utc>>) -> Result<UpdateStatus> {
        let remote = self.remote();
        let extra = self.cached_mirror_urls()?;
        remote.with_mirror(&extra, || self.run_update(&remote, now))
    }

    /// Downloads and verifies a package tarball, then hands the temp file to
    /// `callback`. The file is deleted after the callback returns; the
    /// callback must copy or rename it to keep it.
    ///
    /// The package's targets metadata is read from inside the cached index
    /// archive, which was verified when it entered the cache.
    pub fn download_package<T, F>(&self, package: &PackageId, callback: F) -> Result<T>
    where
        F: FnOnce(&Path) -> T,
    {
        let targets_path = self.index_layout.package_targets_path(package);
        let raw = self
            .cache
            .get_from_index(&targets_path)?
            .ok_or_else(|| Error::InvalidPackage {
                package: package.to_string(),
            })?;
        let targets: Trusted<Targets> =
            trust::parse_cached(&self.cache.index_tar_path(), &raw)?;

        let target_name = self.repo_layout.package_tarball_name(package);
        let target_info = match targets.targets.get(&target_name) {
            Some(info) => info.clone(),
            None => {
                return Err(Error::InvalidPackage {
                    package: package.to_string(),
                })
            }
        };

        let staging = self.cache.staging()?;
        let temp = staging.path_for("package.tar.gz");
        let repo_path = self.repo_layout.package_tarball_path(package);
        let remote = self.remote();
        let extra = self.cached_mirror_urls()?;
        remote.with_mirror(&extra, || {
            info!("Downloading {}", repo_path);
            remote.fetch_file(
                &repo_path,
                SizeBound::Info(&target_info),
                Attempt::First.flags(),
                &temp,
            )
        })?;
        // The tarball itself is never cached; the staging directory removes
        // it when this function returns.
        Ok(callback(&temp))
    }

    /// Reads a package's build metadata file straight out of the cached index
    /// archive.
    pub fn package_metadata(&self, package: &PackageId) -> Result<Vec<u8>> {
        let path = self.index_layout.package_metadata_path(package);
        self.cache
            .get_from_index(&path)?
            .ok_or_else(|| Error::InvalidPackage {
                package: package.to_string(),
            })
    }

    fn remote(&self) -> RemoteRepository<'_> {
        RemoteRepository::new(
            self.transport.as_ref(),
            &self.repo_layout,
            &self.mirrors,
            &self.caps,
        )
    }

    /// The trusted mirror list from the cache, as normalized URLs. Absent or
    /// empty lists are fine; this only ever adds candidates.
    fn cached_mirror_urls(&self) -> Result<Vec<Url>> {
        let bytes = match self.cache.read_role(CachedRole::Mirrors)? {
            Some(bytes) => bytes,
            None => return Ok(Vec::new()),
        };
        let mirrors: Trusted<Mirrors> =
            trust::parse_cached(&self.cache.role_path(CachedRole::Mirrors), &bytes)?;
        let mut urls = Vec::new();
        for urlbase in mirrors.full_mirrors() {
            match parse_url(urlbase) {
                Ok(url) => urls.push(url),
                Err(e) => warn!("ignoring unparseable mirror '{}': {}", urlbase, e),
            }
        }
        Ok(urls)
    }

    /// The retry loop around one update attempt. Keeps the ordered history of
    /// what each attempt produced; after [`MAX_ITERATIONS`] fruitless
    /// attempts the history is surfaced as [`VerificationError::Loop`].
    fn run_update(
        &self,
        remote: &RemoteRepository<'_>,
        now: Option<DateTime<Utc>>,
    ) -> Result<UpdateStatus> {
        let mut history: Vec<UpdateEvent> = Vec::new();
        loop {
            if history.len() >= MAX_ITERATIONS {
                return Err(VerificationError::Loop {
                    history: std::mem::take(&mut history),
                }
                .into());
            }
            let attempt = if history.is_empty() {
                Attempt::First
            } else {
                Attempt::Retry
            };
            match self.update_once(remote, attempt, now) {
                Ok(status) => return Ok(status),
                Err(Interrupt::RootUpdated) => {
                    debug!("trusted root changed; restarting update check");
                    history.push(UpdateEvent::RootUpdated);
                }
                Err(Interrupt::Verification(e)) => {
                    warn!("verification failed: {}; refreshing trusted root and retrying", e);
                    // The failure may stem from a key rotation we have not
                    // seen yet; refresh the root before the next attempt.
                    self.update_root(remote, Attempt::Retry, None, now)?;
                    history.push(UpdateEvent::Verification(e));
                }
                Err(Interrupt::Fatal(e)) => return Err(e),
            }
        }
    }

    /// One pass of the update state machine. Downloads are tentative until
    /// the final promote; any early exit discards them.
    fn update_once(
        &self,
        remote: &RemoteRepository<'_>,
        attempt: Attempt,
        now: Option<DateTime<Utc>>,
    ) -> std::result::Result<UpdateStatus, Interrupt> {
        let state = self.cache.cached_state()?;
        let mut staging = self.cache.staging()?;
        let flags = attempt.flags();
        let layout = &self.repo_layout;

        // Timestamp: always fetched, bounded by the hard ceiling since no
        // file info for it exists anywhere.
        info!("Downloading {}", layout.timestamp_path);
        let timestamp_temp = staging.path_for("timestamp.json");
        remote.fetch_file(
            &layout.timestamp_path,
            SizeBound::Ceiling {
                limit: self.limits.max_timestamp_size,
                specifier: "max_timestamp_size",
            },
            flags,
            &timestamp_temp,
        )?;
        let timestamp_bytes = read_file(&timestamp_temp)?;
        let new_timestamp: Trusted<Timestamp> = trust::verify_role(
            &state.root,
            &layout.timestamp_path,
            state.timestamp.as_ref().map(|t| t.version().get()),
            now,
            &timestamp_bytes,
        )
        .map_err(Error::from)?;

        let new_snapshot_info = new_timestamp
            .file_info(&layout.snapshot_path)
            .ok_or_else(|| missing_meta(&layout.timestamp_path, &layout.snapshot_path))?
            .clone();

        // Same snapshot as the trusted timestamp: nothing to do. The fresh
        // timestamp is still cached for its newer expiry.
        if let Some(cached_timestamp) = &state.timestamp {
            if cached_timestamp.file_info(&layout.snapshot_path) == Some(&new_snapshot_info) {
                self.cache.cache_remote_file(
                    &timestamp_temp,
                    DownloadFormat::Uncompressed,
                    Disposition::CacheAs(CachedRole::Timestamp),
                )?;
                return Ok(UpdateStatus::NoUpdates);
            }
        }
        staging.stage(
            timestamp_temp,
            DownloadFormat::Uncompressed,
            Disposition::CacheAs(CachedRole::Timestamp),
        );

        // Snapshot.
        info!("Downloading {}", layout.snapshot_path);
        let snapshot_temp = staging.path_for("snapshot.json");
        remote.fetch_file(
            &layout.snapshot_path,
            SizeBound::Info(&new_snapshot_info),
            flags,
            &snapshot_temp,
        )?;
        let snapshot_bytes = read_file(&snapshot_temp)?;
        let new_snapshot: Trusted<Snapshot> = trust::verify_role(
            &state.root,
            &layout.snapshot_path,
            state.snapshot.as_ref().map(|s| s.version().get()),
            now,
            &snapshot_bytes,
        )
        .map_err(Error::from)?;

        // Root rotation check. The comparison is against the *cached*
        // snapshot's root info; with no cached snapshot the root counts as
        // unchanged, otherwise a fresh cache could never finish its first
        // check.
        let new_root_info = new_snapshot
            .file_info(&layout.root_path)
            .ok_or_else(|| missing_meta(&layout.snapshot_path, &layout.root_path))?;
        if let Some(cached_snapshot) = &state.snapshot {
            if cached_snapshot.file_info(&layout.root_path) != Some(new_root_info) {
                self.update_root(remote, attempt, Some(new_root_info), now)?;
                return Err(Interrupt::RootUpdated);
            }
        }
        staging.stage(
            snapshot_temp,
            DownloadFormat::Uncompressed,
            Disposition::CacheAs(CachedRole::Snapshot),
        );

        // Mirrors. A missing cached copy counts as changed so the download
        // happens.
        let new_mirrors_info = new_snapshot
            .file_info(&layout.mirrors_path)
            .ok_or_else(|| missing_meta(&layout.snapshot_path, &layout.mirrors_path))?;
        let cached_mirrors_info = state
            .snapshot
            .as_ref()
            .and_then(|s| s.file_info(&layout.mirrors_path));
        if cached_mirrors_info != Some(new_mirrors_info)
            || self.cache.get_cached(CachedRole::Mirrors).is_none()
        {
            info!("Downloading {}", layout.mirrors_path);
            let mirrors_temp = staging.path_for("mirrors.json");
            remote.fetch_file(
                &layout.mirrors_path,
                SizeBound::Info(new_mirrors_info),
                flags,
                &mirrors_temp,
            )?;
            let mirrors_bytes = read_file(&mirrors_temp)?;
            let _mirrors: Trusted<Mirrors> = trust::verify_role(
                &state.root,
                &layout.mirrors_path,
                state.mirrors.as_ref().map(|m| m.version().get()),
                now,
                &mirrors_bytes,
            )
            .map_err(Error::from)?;
            staging.stage(
                mirrors_temp,
                DownloadFormat::Uncompressed,
                Disposition::CacheAs(CachedRole::Mirrors),
            );
        }

        // Index archive.
        let gz_info = new_snapshot
            .file_info(&layout.index_tar_gz_path)
            .ok_or_else(|| missing_meta(&layout.snapshot_path, &layout.index_tar_gz_path))?;
        let tar_info = new_snapshot.file_info(&layout.index_tar_path);
        let cached_gz_info = state
            .snapshot
            .as_ref()
            .and_then(|s| s.file_info(&layout.index_tar_gz_path));
        if cached_gz_info != Some(gz_info) || self.cache.local_index_len()?.is_none() {
            self.update_index(remote, attempt, &mut staging, gz_info, tar_info)?;
        }

        staging.promote(&self.cache)?;
        Ok(UpdateStatus::HasUpdates)
    }

    /// Downloads a candidate root and, when it actually differs from the
    /// trusted one, installs it and clears the cached timestamp and snapshot.
    ///
    /// `expected` is the file info from a new snapshot when the change was
    /// discovered that way; on the retry-after-verification-failure path no
    /// info exists and the download is bounded by the root ceiling.
    fn update_root(
        &self,
        remote: &RemoteRepository<'_>,
        attempt: Attempt,
        expected: Option<&FileInfo>,
        now: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let state = self.cache.cached_state()?;
        let staging = self.cache.staging()?;
        let path = &self.repo_layout.root_path;

        info!("Downloading {}", path);
        let temp = staging.path_for("root.json");
        let bound = match expected {
            Some(info) => SizeBound::Info(info),
            None => SizeBound::Ceiling {
                limit: self.limits.max_root_size,
                specifier: "max_root_size",
            },
        };
        remote.fetch_file(path, bound, attempt.flags(), &temp)?;

        let bytes = read_file(&temp)?;
        let new_root: Trusted<Root> = trust::verify_role(
            &state.root,
            path,
            Some(state.root.version().get()),
            now,
            &bytes,
        )
        .map_err(Error::from)?;

        // Did the root actually change? With file info in hand it did, or we
        // would not be here. Without it, compare raw bytes: a re-signed but
        // semantically identical root parses the same yet must replace the
        // cached file, so the decision is keyed on bytes, not structure.
        let changed = match expected {
            Some(_) => true,
            None => {
                let cached_path = self.cache.role_path(CachedRole::Root);
                crate::io::sha256_file(&cached_path)
                    .context(error::CacheIoSnafu { path: &cached_path })?
                    != crate::io::sha256_file(&temp)
                        .context(error::CacheIoSnafu { path: &temp })?
            }
        };

        if changed {
            info!(
                "Installing new trusted root (version {})",
                new_root.version()
            );
            self.cache.cache_remote_file(
                &temp,
                DownloadFormat::Uncompressed,
                Disposition::CacheAs(CachedRole::Root),
            )?;
            // Mandatory: the new root may restart the timestamp/snapshot
            // version counters, and a compromised key may have pinned the old
            // ones at u64::MAX.
            self.cache.clear_cache()?;
        } else {
            debug!("root is unchanged");
        }
        Ok(())
    }

    /// Brings the cached index archive up to the snapshot's description,
    /// incrementally when that is possible and worthwhile.
    fn update_index(
        &self,
        remote: &RemoteRepository<'_>,
        attempt: Attempt,
        staging: &mut Staging,
        gz_info: &FileInfo,
        tar_info: Option<&FileInfo>,
    ) -> Result<()> {
        let local_len = self.cache.local_index_len()?;
        let plan = plan_index_download(
            self.require_compressed_index,
            self.caps.accept_ranges(),
            tar_info,
            local_len,
            gz_info,
        );
        match plan {
            IndexDownload::Update { from, to, tar_info } => {
                info!(
                    "Downloading {} (incremental, bytes {}..{})",
                    self.repo_layout.index_tar_path, from, to
                );
                match self.fetch_index_incremental(remote, attempt, staging, from, to, tar_info) {
                    Err(Error::Verification { source }) if attempt == Attempt::Retry => {
                        // Two incremental attempts have now failed; degrade to
                        // the full compressed download.
                        warn!(
                            "incremental index update failed verification ({}); \
                             falling back to a full download",
                            source
                        );
                        self.fetch_index_full(remote, attempt, staging, gz_info, Some(tar_info))
                    }
                    other => other,
                }
            }
            IndexDownload::CannotUpdate(reason) => {
                info!(
                    "Downloading {} ({})",
                    self.repo_layout.index_tar_gz_path, reason
                );
                self.fetch_index_full(remote, attempt, staging, gz_info, tar_info)
            }
        }
    }

    /// Extends a copy of the local archive with a byte range and verifies the
    /// result against the snapshot's description of the uncompressed archive.
    fn fetch_index_incremental(
        &self,
        remote: &RemoteRepository<'_>,
        attempt: Attempt,
        staging: &mut Staging,
        from: u64,
        to: u64,
        tar_info: &FileInfo,
    ) -> Result<()> {
        let tar_temp = staging.path_for("index.tar");
        copy_prefix(&self.cache.index_tar_path(), &tar_temp, from)?;
        remote.fetch_index_range(ByteRange { from, to }, attempt.flags(), &tar_temp)?;

        let ok = crate::io::verify_file_info(&tar_temp, tar_info)
            .context(error::CacheIoSnafu { path: &tar_temp })?;
        if !ok {
            return Err(VerificationError::FileInfoMismatch {
                path: self.repo_layout.index_tar_path.clone(),
            }
            .into());
        }
        staging.stage(
            tar_temp,
            DownloadFormat::Uncompressed,
            Disposition::CacheIndex,
        );
        Ok(())
    }

    /// Downloads the compressed archive whole, decompresses it, and stages
    /// both forms.
    fn fetch_index_full(
        &self,
        remote: &RemoteRepository<'_>,
        attempt: Attempt,
        staging: &mut Staging,
        gz_info: &FileInfo,
        tar_info: Option<&FileInfo>,
    ) -> Result<()> {
        let gz_temp = staging.path_for("index.tar.gz");
        let mut flags = attempt.flags();
        // The archive is already compressed; transport compression would only
        // add overhead.
        flags.accept_compression = false;
        remote.fetch_file(
            &self.repo_layout.index_tar_gz_path,
            SizeBound::Info(gz_info),
            flags,
            &gz_temp,
        )?;

        let tar_temp = staging.path_for("index.tar");
        index::unpack_gz(&gz_temp, &tar_temp)?;
        if let Some(info) = tar_info {
            let ok = crate::io::verify_file_info(&tar_temp, info)
                .context(error::CacheIoSnafu { path: &tar_temp })?;
            if !ok {
                return Err(VerificationError::FileInfoMismatch {
                    path: self.repo_layout.index_tar_path.clone(),
                }
                .into());
            }
        }

        staging.stage(gz_temp, DownloadFormat::Gzip, Disposition::CacheIndex);
        staging.stage(
            tar_temp,
            DownloadFormat::Uncompressed,
            Disposition::CacheIndex,
        );
        Ok(())
    }
}

/// A snapshot or timestamp that fails to describe a file it must describe is
/// a schema-level verification failure.
fn missing_meta(role_path: &str, entry: &str) -> Error {
    VerificationError::Deserialization {
        path: role_path.to_owned(),
        kind: error::DeserializationKind::SchemaViolation,
        detail: format!("missing meta entry '{}'", entry),
    }
    .into()
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).context(error::CacheIoSnafu { path })
}

/// Copies the first `len` bytes of `src` to a new file at `dest`.
fn copy_prefix(src: &Path, dest: &Path, len: u64) -> Result<()> {
    let file = File::open(src).context(error::CacheIoSnafu { path: src })?;
    let mut reader = file.take(len);
    let mut out = File::create(dest).context(error::CacheIoSnafu { path: dest })?;
    let copied = std::io::copy(&mut reader, &mut out).context(error::CacheIoSnafu { path: dest })?;
    if copied != len {
        return Err(Error::LocalFileCorrupted {
            path: src.to_owned(),
            detail: format!("expected at least {} bytes, found {}", len, copied),
        });
    }
    Ok(())
}

fn parse_url(url: &str) -> Result<Url> {
    let mut url = Cow::from(url);
    if !url.ends_with('/') {
        url.to_mut().push('/');
    }
    Url::parse(&url).context(error::ParseUrlSnafu { url })
}
