//! The remote repository: mirror pinning and per-file download planning.

use crate::error::{self, Error, Result};
use crate::fetch::{self, SizeBound};
use crate::layout::RepoLayout;
use crate::schema::FileInfo;
use crate::transport::{ByteRange, RequestFlags, Transport, TransportRequest};
use log::{debug, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use snafu::{ensure, OptionExt, ResultExt};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use url::Url;

/// Tar archives end in a run of zero blocks. When appending to a local copy
/// of the index we re-request at least this much of the tail so the old
/// trailer is rewritten by real entries.
pub(crate) const INDEX_TRAILER_LEN: u64 = 1024;

/// The characters escaped when a repository path is joined onto a mirror's
/// base URL.
const PATH_SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'#').add(b'?').add(b'%');

/// Capabilities the currently selected server has advertised. These are
/// monotonic: once observed they stay set, so they are safe to read without
/// holding a lock.
#[derive(Debug, Default)]
pub(crate) struct ServerCapabilities {
    accept_ranges: AtomicBool,
}

impl ServerCapabilities {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn observe(&self, info: &crate::transport::ResponseInfo) {
        if info.accept_ranges_bytes {
            self.accept_ranges.store(true, Ordering::Relaxed);
        }
    }

    pub(crate) fn accept_ranges(&self) -> bool {
        self.accept_ranges.load(Ordering::Relaxed)
    }
}

/// Why the index cannot be updated incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CannotUpdateReason {
    /// The client is configured to always fetch the compressed form.
    CompressedOnly,
    /// The server has not advertised byte-range support.
    RangesNotSupported,
    /// The snapshot does not describe the uncompressed archive.
    MissingUncompressedInfo,
    /// There is no local archive to extend.
    NoLocalCopy,
    /// The local archive is longer than the one the snapshot describes.
    LocalNewerThanRemote,
    /// Fetching the missing tail would cost more than the compressed archive.
    FullDownloadCheaper,
}

impl fmt::Display for CannotUpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CannotUpdateReason::CompressedOnly => "client requires the compressed form",
            CannotUpdateReason::RangesNotSupported => "server does not support byte ranges",
            CannotUpdateReason::MissingUncompressedInfo => {
                "snapshot does not describe the uncompressed archive"
            }
            CannotUpdateReason::NoLocalCopy => "no local archive to extend",
            CannotUpdateReason::LocalNewerThanRemote => "local archive is longer than remote",
            CannotUpdateReason::FullDownloadCheaper => "full download is smaller",
        };
        write!(f, "{}", reason)
    }
}

/// How the index archive will be downloaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum IndexDownload<'a> {
    /// Extend the local uncompressed archive with a byte range.
    Update {
        /// First byte to request; the trailer of the local copy is
        /// re-requested so it can be rewritten.
        from: u64,
        /// One past the last byte: the new uncompressed length.
        to: u64,
        /// The signed info the assembled archive must match.
        tar_info: &'a FileInfo,
    },
    /// Download the compressed archive in full.
    CannotUpdate(CannotUpdateReason),
}

/// Decides whether the index archive can be updated incrementally. Every
/// other repository file is always downloaded whole.
pub(crate) fn plan_index_download<'a>(
    require_compressed: bool,
    ranges_supported: bool,
    tar_info: Option<&'a FileInfo>,
    local_len: Option<u64>,
    gz_info: &FileInfo,
) -> IndexDownload<'a> {
    use CannotUpdateReason::*;

    if require_compressed {
        return IndexDownload::CannotUpdate(CompressedOnly);
    }
    if !ranges_supported {
        return IndexDownload::CannotUpdate(RangesNotSupported);
    }
    let tar_info = match tar_info {
        Some(info) => info,
        None => return IndexDownload::CannotUpdate(MissingUncompressedInfo),
    };
    let local_len = match local_len {
        Some(len) if len > 0 => len,
        _ => return IndexDownload::CannotUpdate(NoLocalCopy),
    };
    let remaining = match tar_info.length.checked_sub(local_len) {
        Some(remaining) => remaining,
        None => return IndexDownload::CannotUpdate(LocalNewerThanRemote),
    };
    if remaining >= gz_info.length {
        return IndexDownload::CannotUpdate(FullDownloadCheaper);
    }
    IndexDownload::Update {
        from: local_len.saturating_sub(INDEX_TRAILER_LEN),
        to: tar_info.length,
        tar_info,
    }
}

/// A set of mirrors serving one repository, with at most one pinned at a
/// time.
#[derive(Debug)]
pub(crate) struct RemoteRepository<'a> {
    transport: &'a dyn Transport,
    layout: &'a RepoLayout,
    base_mirrors: &'a [Url],
    selected: RwLock<Option<Url>>,
    caps: &'a ServerCapabilities,
}

impl<'a> RemoteRepository<'a> {
    pub(crate) fn new(
        transport: &'a dyn Transport,
        layout: &'a RepoLayout,
        base_mirrors: &'a [Url],
        caps: &'a ServerCapabilities,
    ) -> Self {
        Self {
            transport,
            layout,
            base_mirrors,
            selected: RwLock::new(None),
            caps,
        }
    }

    /// Runs `f` with one mirror pinned. The candidate list is the out-of-band
    /// mirrors followed by `extra` (typically the trusted mirror list),
    /// de-duplicated preserving first occurrence. When `f` fails with a
    /// remote error the next mirror is tried; the last mirror's error
    /// propagates. Any other outcome ends the scope immediately.
    pub(crate) fn with_mirror<T, F>(&self, extra: &[Url], mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut mirrors: Vec<&Url> = Vec::new();
        for mirror in self.base_mirrors.iter().chain(extra.iter()) {
            if !mirrors.contains(&mirror) {
                mirrors.push(mirror);
            }
        }
        ensure!(!mirrors.is_empty(), error::NoMirrorsConfiguredSnafu);

        let count = mirrors.len();
        let mut last_error = None;
        for (position, mirror) in mirrors.into_iter().enumerate() {
            debug!("using mirror '{}'", mirror);
            self.set_selected(Some(mirror.clone()));
            let outcome = f();
            self.set_selected(None);
            match outcome {
                Err(e @ Error::Remote { .. }) if position + 1 < count => {
                    warn!("mirror '{}' failed: {}; trying next mirror", mirror, e);
                    last_error = Some(e);
                }
                other => return other,
            }
        }
        // The loop either returned or recorded an error for every mirror.
        Err(last_error.unwrap_or_else(|| error::NoMirrorsConfiguredSnafu.build()))
    }

    fn set_selected(&self, mirror: Option<Url>) {
        *self
            .selected
            .write()
            .unwrap_or_else(PoisonError::into_inner) = mirror;
    }

    /// The pinned mirror. Reading this outside a `with_mirror` scope is a
    /// programming error and reported as such.
    fn selected_mirror(&self) -> Result<Url> {
        self.selected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .context(error::NoMirrorSelectedSnafu)
    }

    fn url_for(&self, repo_path: &str) -> Result<Url> {
        let mirror = self.selected_mirror()?;
        let encoded = utf8_percent_encode(repo_path, PATH_SEGMENT).to_string();
        mirror.join(&encoded).context(error::JoinUrlSnafu {
            path: repo_path,
            url: mirror.clone(),
        })
    }

    /// Fetches a repository file in full, enforcing `bound`.
    pub(crate) fn fetch_file(
        &self,
        repo_path: &str,
        bound: SizeBound<'_>,
        flags: RequestFlags,
        dest: &Path,
    ) -> Result<()> {
        let request = TransportRequest {
            url: self.url_for(repo_path)?,
            range: None,
            flags,
        };
        let info = fetch::fetch_to_file(self.transport, request, bound, repo_path, dest)?;
        self.caps.observe(&info);
        Ok(())
    }

    /// Fetches a byte range of the uncompressed index archive and appends it
    /// to `dest`. Compression is never requested on ranges.
    pub(crate) fn fetch_index_range(
        &self,
        range: ByteRange,
        mut flags: RequestFlags,
        dest: &Path,
    ) -> Result<()> {
        flags.accept_compression = false;
        let repo_path = self.layout.index_tar_path.as_str();
        let request = TransportRequest {
            url: self.url_for(repo_path)?,
            range: Some(range),
            flags,
        };
        let info = fetch::fetch_append(self.transport, request, repo_path, dest)?;
        self.caps.observe(&info);
        Ok(())
    }
}
