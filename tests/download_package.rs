// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verified package downloads out of an updated repository.


use staunch::error::{Error, VerificationError};
use staunch::layout::PackageId;
use tempfile::TempDir;
use test_utils::{bootstrap, make_client, TestRepo};

#[test]
fn download_package_hands_over_a_temp_file() {
    let mut repo = TestRepo::new();
    let acme = repo.add_package("acme", "1.0", b"acme contents");
    repo.publish();

    let cache = TempDir::new().unwrap();
    let client = make_client(&repo, cache.path());
    bootstrap(&client, &repo);
    client.check_for_updates(Some(repo.now())).unwrap();

    let keep = TempDir::new().unwrap();
    let kept = keep.path().join("acme-1.0.tar.gz");
    let (bytes, temp_path) = client
        .download_package(&acme, |path| {
            std::fs::copy(path, &kept).unwrap();
            (std::fs::read(path).unwrap(), path.to_owned())
        })
        .unwrap();

    // The callback saw the verified bytes, and its copy survives while the
    // engine's temp file does not.
    let served = std::fs::read(repo.dir.path().join("acme-1.0/acme-1.0.tar.gz")).unwrap();
    assert_eq!(bytes, served);
    assert_eq!(std::fs::read(&kept).unwrap(), served);
    assert!(!temp_path.exists());
}

#[test]
fn unknown_package_is_invalid() {
    let mut repo = TestRepo::new();
    repo.add_package("acme", "1.0", b"acme contents");
    repo.publish();

    let cache = TempDir::new().unwrap();
    let client = make_client(&repo, cache.path());
    bootstrap(&client, &repo);
    client.check_for_updates(Some(repo.now())).unwrap();

    let missing = PackageId::new("ghost", "0.1");
    let err = client.download_package(&missing, |_| ()).unwrap_err();
    assert!(matches!(err, Error::InvalidPackage { .. }), "got {:?}", err);
    let err = client.package_metadata(&missing).unwrap_err();
    assert!(matches!(err, Error::InvalidPackage { .. }), "got {:?}", err);
}

#[test]
fn tampered_tarball_fails_file_info() {
    let mut repo = TestRepo::new();
    let acme = repo.add_package("acme", "1.0", b"acme contents");
    repo.publish();

    let cache = TempDir::new().unwrap();
    let client = make_client(&repo, cache.path());
    bootstrap(&client, &repo);
    client.check_for_updates(Some(repo.now())).unwrap();

    // Replace the served tarball with same-length garbage.
    let path = repo.dir.path().join("acme-1.0/acme-1.0.tar.gz");
    let len = std::fs::metadata(&path).unwrap().len() as usize;
    std::fs::write(&path, vec![0x5au8; len]).unwrap();

    let err = client.download_package(&acme, |_| ()).unwrap_err();
    match err {
        Error::Verification {
            source: VerificationError::FileInfoMismatch { path },
        } => assert_eq!(path, "acme-1.0/acme-1.0.tar.gz"),
        other => panic!("expected FileInfoMismatch, got {:?}", other),
    }
}

#[test]
fn package_metadata_reads_from_the_index() {
    let mut repo = TestRepo::new();
    let acme = repo.add_package("acme", "1.0", b"acme contents");
    repo.publish();

    let cache = TempDir::new().unwrap();
    let client = make_client(&repo, cache.path());
    bootstrap(&client, &repo);
    client.check_for_updates(Some(repo.now())).unwrap();

    assert_eq!(
        client.package_metadata(&acme).unwrap(),
        b"name: acme\nversion: 1.0\n"
    );

    // The lookup works even when the sidecar disappears; it is rebuilt from
    // the archive.
    std::fs::remove_file(cache.path().join("01-index.tar.idx")).unwrap();
    assert_eq!(
        client.package_metadata(&acme).unwrap(),
        b"name: acme\nversion: 1.0\n"
    );
}
