//! The local cache: the trusted role files, the package index archive, and
//! the tar-index sidecar.
//!
//! Every file is installed by renaming a temp file that lives in the cache
//! directory, so readers either see the previous contents or the new,
//! fully-verified contents. Nothing half-written ever appears under a
//! published name.

use crate::error::{self, Result};
use crate::index::TarIndex;
use crate::layout::CacheLayout;
use crate::schema::{Mirrors, Root, Snapshot, Timestamp};
use crate::trust::{self, Trusted};
use log::{debug, warn};
use snafu::ResultExt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of the per-invocation staging directories created under the cache
/// root. Directories with this prefix left behind by a killed process are
/// swept when the cache is opened.
const STAGING_PREFIX: &str = ".staging";

/// The roles that are cached as standalone files. Targets metadata lives
/// inside the index archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CachedRole {
    Root,
    Timestamp,
    Snapshot,
    Mirrors,
}

impl CachedRole {
    fn rel_path(self, layout: &CacheLayout) -> &str {
        match self {
            CachedRole::Root => &layout.root_path,
            CachedRole::Timestamp => &layout.timestamp_path,
            CachedRole::Snapshot => &layout.snapshot_path,
            CachedRole::Mirrors => &layout.mirrors_path,
        }
    }
}

/// What a downloaded file is, for cache installation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DownloadFormat {
    Uncompressed,
    Gzip,
}

/// What the cache should do with a downloaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Leave the file out of the cache (delete the temp file).
    DontCache,
    /// Install as the named role file.
    CacheAs(CachedRole),
    /// Install as the index archive (compressed or uncompressed per the
    /// download format). Installing the uncompressed archive rebuilds the
    /// tar-index in the same critical section.
    CacheIndex,
}

/// The trusted metadata currently present in the cache. Loaded at the start
/// of every update iteration.
#[derive(Debug)]
pub(crate) struct CachedState {
    pub(crate) root: Trusted<Root>,
    pub(crate) timestamp: Option<Trusted<Timestamp>>,
    pub(crate) snapshot: Option<Trusted<Snapshot>>,
    pub(crate) mirrors: Option<Trusted<Mirrors>>,
}

/// The cache directory and its layout.
#[derive(Debug, Clone)]
pub(crate) struct Cache {
    root_dir: PathBuf,
    layout: CacheLayout,
}

impl Cache {
    /// Opens (creating if needed) the cache directory and sweeps any staging
    /// directories a killed process left behind.
    pub(crate) fn open(root_dir: PathBuf, layout: CacheLayout) -> Result<Self> {
        fs::create_dir_all(&root_dir).context(error::CacheIoSnafu { path: &root_dir })?;
        let cache = Self { root_dir, layout };
        cache.sweep_stale_staging();
        Ok(cache)
    }

    fn sweep_stale_staging(&self) {
        let entries = match fs::read_dir(&self.root_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let is_staging = name
                .to_str()
                .map(|n| n.starts_with(STAGING_PREFIX))
                .unwrap_or(false);
            if is_staging && entry.path().is_dir() {
                debug!("removing stale staging directory '{}'", entry.path().display());
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(
                        "could not remove stale staging directory '{}': {}",
                        entry.path().display(),
                        e
                    );
                }
            }
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root_dir.join(rel)
    }

    pub(crate) fn role_path(&self, role: CachedRole) -> PathBuf {
        self.path(role.rel_path(&self.layout))
    }

    pub(crate) fn index_tar_path(&self) -> PathBuf {
        self.path(&self.layout.index_tar_path)
    }

    /// The path of a cached role file, or `None` when the role file is not
    /// present.
    pub(crate) fn get_cached(&self, role: CachedRole) -> Option<PathBuf> {
        let path = self.role_path(role);
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }

    /// Reads a cached role file's bytes, or `None` when it is not present.
    pub(crate) fn read_role(&self, role: CachedRole) -> Result<Option<Vec<u8>>> {
        let path = self.role_path(role);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(error::CacheIoSnafu { path }),
        }
    }

    /// Loads the trusted metadata currently in the cache. A cached root is
    /// required; everything else is optional.
    pub(crate) fn cached_state(&self) -> Result<CachedState> {
        let root_path = self.role_path(CachedRole::Root);
        let root_bytes = self
            .read_role(CachedRole::Root)?
            .ok_or(error::Error::NoTrustedRoot)?;
        let root = trust::parse_cached::<Root>(&root_path, &root_bytes)?;

        let timestamp = self
            .read_role(CachedRole::Timestamp)?
            .map(|bytes| {
                trust::parse_cached::<Timestamp>(&self.role_path(CachedRole::Timestamp), &bytes)
            })
            .transpose()?;
        let snapshot = self
            .read_role(CachedRole::Snapshot)?
            .map(|bytes| {
                trust::parse_cached::<Snapshot>(&self.role_path(CachedRole::Snapshot), &bytes)
            })
            .transpose()?;
        let mirrors = self
            .read_role(CachedRole::Mirrors)?
            .map(|bytes| {
                trust::parse_cached::<Mirrors>(&self.role_path(CachedRole::Mirrors), &bytes)
            })
            .transpose()?;

        Ok(CachedState {
            root,
            timestamp,
            snapshot,
            mirrors,
        })
    }

    /// The length of the local uncompressed index archive, or `None` when no
    /// archive is cached.
    pub(crate) fn local_index_len(&self) -> Result<Option<u64>> {
        let path = self.index_tar_path();
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(error::CacheIoSnafu { path }),
        }
    }

    /// Resolves a path inside the index archive and returns its contents.
    ///
    /// A missing or unreadable sidecar is rebuilt from the tarball and the
    /// lookup retried once. An invalid tarball is fatal.
    pub(crate) fn get_from_index(&self, path_in_tar: &str) -> Result<Option<Vec<u8>>> {
        let tar_path = self.index_tar_path();
        if !tar_path.is_file() {
            return Ok(None);
        }

        let index = match TarIndex::load(&self.path(&self.layout.tar_index_path))? {
            Some(index) => index,
            None => self.rebuild_tar_index()?,
        };
        let entry = match index.get(path_in_tar) {
            Some(entry) => entry,
            None => {
                // The sidecar may predate the current tarball; rebuild once.
                let index = self.rebuild_tar_index()?;
                match index.get(path_in_tar) {
                    Some(entry) => entry,
                    None => return Ok(None),
                }
            }
        };
        TarIndex::read_entry(&tar_path, entry).map(Some)
    }

    /// Rebuilds the tar-index sidecar from the cached tarball and installs it
    /// atomically.
    pub(crate) fn rebuild_tar_index(&self) -> Result<TarIndex> {
        let tar_path = self.index_tar_path();
        debug!("rebuilding tar-index from '{}'", tar_path.display());
        let index = TarIndex::build(&tar_path)?;
        let sidecar_path = self.path(&self.layout.tar_index_path);
        let bytes = index
            .to_bytes()
            .context(error::CacheIoSnafu { path: &sidecar_path })?;
        self.install_bytes(&bytes, &sidecar_path)?;
        Ok(index)
    }

    /// Atomically installs a downloaded file per its disposition.
    pub(crate) fn cache_remote_file(
        &self,
        temp: &Path,
        format: DownloadFormat,
        disposition: Disposition,
    ) -> Result<()> {
        match disposition {
            Disposition::DontCache => match fs::remove_file(temp) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).context(error::CacheIoSnafu { path: temp }),
            },
            Disposition::CacheAs(role) => self.install_file(temp, &self.role_path(role)),
            Disposition::CacheIndex => match format {
                DownloadFormat::Gzip => {
                    self.install_file(temp, &self.path(&self.layout.index_tar_gz_path))
                }
                DownloadFormat::Uncompressed => {
                    self.install_file(temp, &self.index_tar_path())?;
                    self.rebuild_tar_index()?;
                    Ok(())
                }
            },
        }
    }

    /// Deletes the cached timestamp and snapshot. Run after a root rotation:
    /// the new root may legitimately restart those roles' version counters,
    /// and a compromised key may have pinned them at the maximum.
    pub(crate) fn clear_cache(&self) -> Result<()> {
        self.remove(CachedRole::Timestamp)?;
        self.remove(CachedRole::Snapshot)?;
        Ok(())
    }

    fn remove(&self, role: CachedRole) -> Result<()> {
        let path = self.role_path(role);
        debug!("removing '{}'", path.display());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(error::CacheIoSnafu { path }),
        }
    }

    /// Creates a staging area for one invocation's tentative downloads.
    pub(crate) fn staging(&self) -> Result<Staging> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root_dir)
            .context(error::CacheIoSnafu {
                path: &self.root_dir,
            })?;
        Ok(Staging {
            dir,
            pending: Vec::new(),
        })
    }

    fn install_file(&self, temp: &Path, dest: &Path) -> Result<()> {
        debug!("installing '{}'", dest.display());
        fs::rename(temp, dest).context(error::CacheIoSnafu { path: dest })?;
        Ok(())
    }

    fn install_bytes(&self, bytes: &[u8], dest: &Path) -> Result<()> {
        let temp = tempfile::NamedTempFile::new_in(&self.root_dir).context(
            error::CacheIoSnafu {
                path: &self.root_dir,
            },
        )?;
        fs::write(temp.path(), bytes).context(error::CacheIoSnafu { path: temp.path() })?;
        temp.persist(dest)
            .map_err(|e| e.error)
            .context(error::CacheIoSnafu { path: dest })?;
        Ok(())
    }
}

/// Tentative downloads for one invocation. Files accumulate in a temp
/// directory under the cache root; on success they are promoted into the
/// cache in order, and on any abort the directory (and everything in it)
/// disappears when this value drops.
#[derive(Debug)]
pub(crate) struct Staging {
    dir: TempDir,
    pending: Vec<(PathBuf, DownloadFormat, Disposition)>,
}

impl Staging {
    /// A path inside the staging directory for a download to land in.
    pub(crate) fn path_for(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Records a downloaded file for promotion.
    pub(crate) fn stage(&mut self, path: PathBuf, format: DownloadFormat, disposition: Disposition) {
        self.pending.push((path, format, disposition));
    }

    /// Promotes all recorded downloads into the cache, in the order they were
    /// staged.
    pub(crate) fn promote(self, cache: &Cache) -> Result<()> {
        for (path, format, disposition) in &self.pending {
            cache.cache_remote_file(path, *format, *disposition)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_cache(dir: &Path) -> Cache {
        Cache::open(dir.to_owned(), CacheLayout::default()).unwrap()
    }

    #[test]
    fn staging_cleans_up_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        let staged_path;
        {
            let staging = cache.staging().unwrap();
            staged_path = staging.path_for("timestamp.json");
            std::fs::write(&staged_path, b"{}").unwrap();
            assert!(staged_path.is_file());
        }
        assert!(!staged_path.exists());
    }

    #[test]
    fn promote_installs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        let mut staging = cache.staging().unwrap();

        let ts = staging.path_for("timestamp.json");
        std::fs::write(&ts, b"ts").unwrap();
        staging.stage(
            ts,
            DownloadFormat::Uncompressed,
            Disposition::CacheAs(CachedRole::Timestamp),
        );

        staging.promote(&cache).unwrap();
        assert_eq!(
            std::fs::read(cache.role_path(CachedRole::Timestamp)).unwrap(),
            b"ts"
        );
    }

    #[test]
    fn stale_staging_directories_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(".staging-dead");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("leftover"), b"x").unwrap();
        let _cache = open_cache(dir.path());
        assert!(!stale.exists());
    }

    #[test]
    fn clear_cache_removes_timestamp_and_snapshot_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        for role in &[
            CachedRole::Root,
            CachedRole::Timestamp,
            CachedRole::Snapshot,
            CachedRole::Mirrors,
        ] {
            std::fs::write(cache.role_path(*role), b"{}").unwrap();
        }
        cache.clear_cache().unwrap();
        assert!(cache.get_cached(CachedRole::Root).is_some());
        assert!(cache.get_cached(CachedRole::Timestamp).is_none());
        assert!(cache.get_cached(CachedRole::Snapshot).is_none());
        assert!(cache.get_cached(CachedRole::Mirrors).is_some());
    }
}
