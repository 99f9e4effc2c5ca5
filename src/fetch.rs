// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pulls bytes from a transport into files while enforcing size bounds and
//! digests.

use crate::error::{self, Error, Result, VerificationError};
use crate::io::{self, DigestAdapter, MaxSizeAdapter};
use crate::schema::FileInfo;
use crate::transport::{Transport, TransportError, TransportErrorKind, TransportRequest, ResponseInfo};
use snafu::ResultExt;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

/// How much a download is allowed to produce.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SizeBound<'a> {
    /// The exact, signed file info: the length is authoritative and the
    /// SHA-256 digest must match.
    Info(&'a FileInfo),
    /// A hard ceiling used when no file info is available (e.g. the first
    /// fetch of a root file).
    Ceiling {
        limit: u64,
        specifier: &'static str,
    },
}

/// Fetches a whole file to `dest`, enforcing the bound. Returns what the
/// server reported about itself.
pub(crate) fn fetch_to_file(
    transport: &dyn Transport,
    request: TransportRequest,
    bound: SizeBound<'_>,
    repo_path: &str,
    dest: &Path,
) -> Result<ResponseInfo> {
    let url = request.url.clone();
    let response = transport
        .fetch(request)
        .context(error::RemoteSnafu { path: repo_path })?;
    let info = response.info;

    let (limit, specifier) = match bound {
        SizeBound::Info(file_info) => (file_info.length, "signed file info"),
        SizeBound::Ceiling { limit, specifier } => (limit, specifier),
    };
    let mut reader: Box<dyn Read> = Box::new(MaxSizeAdapter::new(response.body, limit, specifier));
    if let SizeBound::Info(file_info) = bound {
        let sha256 = file_info
            .sha256()
            .ok_or_else(|| VerificationError::FileInfoMismatch {
                path: repo_path.to_owned(),
            })?;
        reader = Box::new(DigestAdapter::sha256(reader, sha256.as_bytes()));
    }

    let mut file = File::create(dest).context(error::CacheIoSnafu { path: dest })?;
    let written = copy(&mut reader, &mut file, repo_path, url.as_str())?;

    if let SizeBound::Info(file_info) = bound {
        // The digest passed, but a signed length that disagrees with the body
        // still makes the file untrustworthy.
        if written != file_info.length {
            return Err(VerificationError::FileInfoMismatch {
                path: repo_path.to_owned(),
            }
            .into());
        }
    }
    Ok(info)
}

/// Fetches a byte range and appends it to `dest`. The bound is the range
/// length; content verification happens after the caller assembles the file.
pub(crate) fn fetch_append(
    transport: &dyn Transport,
    request: TransportRequest,
    repo_path: &str,
    dest: &Path,
) -> Result<ResponseInfo> {
    let url = request.url.clone();
    let limit = request.range.map(|r| r.len()).unwrap_or(u64::MAX);
    let response = transport
        .fetch(request)
        .context(error::RemoteSnafu { path: repo_path })?;
    let info = response.info;

    let mut reader = MaxSizeAdapter::new(response.body, limit, "requested byte range");
    let mut file = OpenOptions::new()
        .append(true)
        .open(dest)
        .context(error::CacheIoSnafu { path: dest })?;
    copy(&mut reader, &mut file, repo_path, url.as_str())?;
    Ok(info)
}

/// `std::io::copy` with the adapters' typed failures mapped onto the crate's
/// error taxonomy.
fn copy<R: Read>(
    reader: &mut R,
    file: &mut File,
    repo_path: &str,
    url: &str,
) -> Result<u64> {
    match std::io::copy(reader, file) {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Some(exceeded) = io::size_limit_error(&e) {
                return Err(VerificationError::FileTooLarge {
                    path: repo_path.to_owned(),
                    limit: exceeded.limit,
                    specifier: exceeded.specifier,
                }
                .into());
            }
            if io::digest_mismatch_error(&e).is_some() {
                return Err(VerificationError::FileInfoMismatch {
                    path: repo_path.to_owned(),
                }
                .into());
            }
            Err(Error::Remote {
                path: repo_path.to_owned(),
                source: TransportError::new(TransportErrorKind::Other, url, e),
            })
        }
    }
}
