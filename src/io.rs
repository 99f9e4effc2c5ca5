// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read adapters that enforce size bounds and digests on downloaded bytes,
//! and streaming file-info verification.

use crate::schema::FileInfo;
use aws_lc_rs::digest::{Context, SHA256};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

/// The typed error smuggled through `std::io::Error` when a size bound is
/// exceeded.
#[derive(Debug)]
pub(crate) struct SizeLimitExceeded {
    pub(crate) limit: u64,
    pub(crate) specifier: &'static str,
}

impl fmt::Display for SizeLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exceeded the maximum size of {} bytes ({})",
            self.limit, self.specifier
        )
    }
}

impl Error for SizeLimitExceeded {}

/// The typed error smuggled through `std::io::Error` when a digest does not
/// match at end of stream.
#[derive(Debug)]
pub(crate) struct DigestMismatch {
    pub(crate) calculated: String,
    pub(crate) expected: String,
}

impl fmt::Display for DigestMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "calculated digest {} does not match expected digest {}",
            self.calculated, self.expected
        )
    }
}

impl Error for DigestMismatch {}

/// Returns the `SizeLimitExceeded` carried by an I/O error, if any.
pub(crate) fn size_limit_error(err: &io::Error) -> Option<&SizeLimitExceeded> {
    err.get_ref().and_then(|e| e.downcast_ref())
}

/// Returns the `DigestMismatch` carried by an I/O error, if any.
pub(crate) fn digest_mismatch_error(err: &io::Error) -> Option<&DigestMismatch> {
    err.get_ref().and_then(|e| e.downcast_ref())
}

/// A reader that fails as soon as more than `max_size` bytes have been read.
pub(crate) struct MaxSizeAdapter<R> {
    reader: R,
    max_size: u64,
    size: u64,
    specifier: &'static str,
}

impl<R> MaxSizeAdapter<R> {
    pub(crate) fn new(reader: R, max_size: u64, specifier: &'static str) -> Self {
        Self {
            reader,
            max_size,
            size: 0,
            specifier,
        }
    }
}

impl<R: Read> Read for MaxSizeAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.reader.read(buf)?;
        self.size = self.size.saturating_add(count as u64);
        if self.size > self.max_size {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                SizeLimitExceeded {
                    limit: self.max_size,
                    specifier: self.specifier,
                },
            ));
        }
        Ok(count)
    }
}

/// A reader that computes a SHA-256 digest of everything read through it and
/// fails at end of stream if the digest does not match the expectation.
pub(crate) struct DigestAdapter<R> {
    reader: R,
    digest: Option<Context>,
    expected: Vec<u8>,
}

impl<R> DigestAdapter<R> {
    pub(crate) fn sha256(reader: R, expected: &[u8]) -> Self {
        Self {
            reader,
            digest: Some(Context::new(&SHA256)),
            expected: expected.to_owned(),
        }
    }
}

impl<R: Read> Read for DigestAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let digest = match &mut self.digest {
            Some(digest) => digest,
            // The digest was already checked at a previous end of stream.
            None => return Ok(0),
        };

        let count = self.reader.read(buf)?;
        if count > 0 {
            digest.update(&buf[..count]);
            return Ok(count);
        }

        let calculated = self.digest.take().map(Context::finish);
        if let Some(calculated) = calculated {
            if calculated.as_ref() != self.expected.as_slice() {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    DigestMismatch {
                        calculated: hex::encode(calculated.as_ref()),
                        expected: hex::encode(&self.expected),
                    },
                ));
            }
        }
        Ok(0)
    }
}

/// Checks a file against its signed info in one streaming pass. Returns true
/// only if the length matches exactly and the SHA-256 digest is both listed
/// and matching.
pub(crate) fn verify_file_info(path: &Path, info: &FileInfo) -> io::Result<bool> {
    let expected = match info.sha256() {
        Some(digest) => digest,
        None => return Ok(false),
    };
    let (length, calculated) = sha256_stream(&mut File::open(path)?)?;
    Ok(length == info.length && calculated == expected.as_bytes())
}

/// The SHA-256 digest of a file's contents.
pub(crate) fn sha256_file(path: &Path) -> io::Result<Vec<u8>> {
    let (_, digest) = sha256_stream(&mut File::open(path)?)?;
    Ok(digest)
}

fn sha256_stream<R: Read>(reader: &mut R) -> io::Result<(u64, Vec<u8>)> {
    let mut digest = Context::new(&SHA256);
    let mut buf = [0u8; 8 * 1024];
    let mut length: u64 = 0;
    loop {
        match reader.read(&mut buf)? {
            0 => break,
            count => {
                digest.update(&buf[..count]);
                length += count as u64;
            }
        }
    }
    Ok((length, digest.finish().as_ref().to_vec()))
}
