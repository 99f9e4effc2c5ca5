//! The tar-index: a sidecar mapping archive-internal paths to byte offsets in
//! the cached index tarball, so single files can be read without walking the
//! whole archive.
//!
//! The sidecar is derived data. It can always be rebuilt from the tarball and
//! carries no security weight; the tarball itself was verified against the
//! snapshot before it entered the cache.

use crate::error::{self, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tar::Archive;

/// Maps archive-internal paths to the position of each entry's contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TarIndex {
    entries: HashMap<String, TarEntry>,
}

/// Where one file's contents live inside the tarball.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct TarEntry {
    offset: u64,
    length: u64,
}

impl TarIndex {
    /// Walks the tarball and records the content position of every regular
    /// file. An unreadable archive is fatal.
    pub(crate) fn build(tar_path: &Path) -> Result<Self> {
        let corrupted = |detail: String| error::Error::LocalFileCorrupted {
            path: tar_path.to_owned(),
            detail,
        };
        let file = File::open(tar_path).context(error::CacheIoSnafu { path: tar_path })?;
        let mut archive = Archive::new(file);
        let mut entries = HashMap::new();
        for entry in archive.entries().map_err(|e| corrupted(e.to_string()))? {
            let entry = entry.map_err(|e| corrupted(e.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            entries.insert(
                path,
                TarEntry {
                    offset: entry.raw_file_position(),
                    length: entry.size(),
                },
            );
        }
        Ok(Self { entries })
    }

    /// Loads the sidecar. Returns `None` when it is absent or does not
    /// deserialize; the caller rebuilds it from the tarball in that case.
    pub(crate) fn load(sidecar_path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(sidecar_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(error::CacheIoSnafu { path: sidecar_path });
            }
        };
        Ok(bincode::deserialize(&bytes).ok())
    }

    /// Serializes the sidecar to bytes.
    pub(crate) fn to_bytes(&self) -> io::Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
    }

    /// The position of a path's contents, if the path is indexed.
    pub(crate) fn get(&self, path: &str) -> Option<TarEntry> {
        self.entries.get(path).copied()
    }

    /// Reads one entry's contents out of the tarball.
    pub(crate) fn read_entry(tar_path: &Path, entry: TarEntry) -> Result<Vec<u8>> {
        let corrupted = |detail: String| error::Error::LocalFileCorrupted {
            path: tar_path.to_owned(),
            detail,
        };
        let mut file = File::open(tar_path).context(error::CacheIoSnafu { path: tar_path })?;
        file.seek(SeekFrom::Start(entry.offset))
            .map_err(|e| corrupted(e.to_string()))?;
        let mut buf = vec![0u8; entry.length as usize];
        file.read_exact(&mut buf)
            .map_err(|e| corrupted(format!("short read inside archive: {}", e)))?;
        Ok(buf)
    }
}

/// Decompresses a gzip file to `dest`.
pub(crate) fn unpack_gz(src: &Path, dest: &Path) -> Result<()> {
    let input = File::open(src).context(error::CacheIoSnafu { path: src })?;
    let mut decoder = GzDecoder::new(input);
    let mut output = File::create(dest).context(error::CacheIoSnafu { path: dest })?;
    io::copy(&mut decoder, &mut output).context(error::CacheIoSnafu { path: dest })?;
    Ok(())
}
