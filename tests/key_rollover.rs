// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Root rotation: the repository rotates a role key and the client recovers
//! by fetching the new root mid-update.


use staunch::error::{Error, UpdateEvent, VerificationError};
use staunch::UpdateStatus;
use tempfile::TempDir;
use test_utils::{bootstrap, make_recording_client, TestRepo};

/// The timestamp key rotates. The first attempt fails with `UnknownKey`, the
/// engine fetches the new root, clears the cached timestamp and snapshot, and
/// the retry completes. The index is extended incrementally because the new
/// snapshot still describes the local archive.
#[test]
fn timestamp_key_rotation_recovers() {
    let mut repo = TestRepo::new();
    repo.add_package("acme", "1.0", b"acme contents");
    repo.publish();

    let cache = TempDir::new().unwrap();
    let (client, transport) = make_recording_client(&repo, cache.path());
    bootstrap(&client, &repo);
    client.check_for_updates(Some(repo.now())).unwrap();
    assert_eq!(client.trusted_root_version().unwrap(), 1);

    repo.rotate_timestamp_key(42);
    transport.clear();

    assert_eq!(
        client.check_for_updates(Some(repo.now())).unwrap(),
        UpdateStatus::HasUpdates
    );
    assert_eq!(client.trusted_root_version().unwrap(), 2);

    let names: Vec<String> = transport
        .requests()
        .iter()
        .map(|(path, _)| path.rsplit('/').next().unwrap().to_owned())
        .collect();

    // First attempt: the timestamp fails against the old root, so the root is
    // refreshed. Second attempt: timestamp, snapshot, and mirrors again.
    assert_eq!(names[0], "timestamp.json");
    assert_eq!(names[1], "root.json");
    assert_eq!(
        &names[2..5],
        &["timestamp.json", "snapshot.json", "mirrors.json"]
    );

    // The index was *updated*, not re-downloaded: the only index fetch is a
    // byte range of the uncompressed archive covering its trailer.
    assert!(transport.fetches_of("01-index.tar.gz").is_empty());
    let ranges = transport.fetches_of("01-index.tar");
    assert_eq!(ranges.len(), 1);
    let tar_len = std::fs::metadata(cache.path().join("01-index.tar"))
        .unwrap()
        .len();
    assert_eq!(ranges[0].1, Some((tar_len - 1024, tar_len)));

    // Nothing left to do afterwards.
    assert_eq!(
        client.check_for_updates(Some(repo.now())).unwrap(),
        UpdateStatus::NoUpdates
    );
}

/// A root change that does not break the timestamp signature is discovered
/// through the new snapshot: the engine installs the new root, restarts, and
/// the restart completes the update.
#[test]
fn root_rotation_discovered_via_snapshot() {
    let mut repo = TestRepo::new();
    repo.add_package("acme", "1.0", b"acme contents");
    repo.publish();

    let cache = TempDir::new().unwrap();
    let (client, transport) = make_recording_client(&repo, cache.path());
    bootstrap(&client, &repo);
    client.check_for_updates(Some(repo.now())).unwrap();

    // A new root that changes nothing the timestamp verification needs.
    repo.root_version += 1;
    repo.root_expires = test_utils::datetime("2098-01-01T00:00:00Z");
    repo.timestamp_version += 1;
    repo.snapshot_version += 1;
    repo.publish();
    transport.clear();

    assert_eq!(
        client.check_for_updates(Some(repo.now())).unwrap(),
        UpdateStatus::HasUpdates
    );
    assert_eq!(client.trusted_root_version().unwrap(), 2);

    let names: Vec<String> = transport
        .requests()
        .iter()
        .map(|(path, _)| path.rsplit('/').next().unwrap().to_owned())
        .collect();
    // Attempt one runs until the snapshot reveals the root change and fetches
    // the new root; the restart re-fetches the chain.
    assert_eq!(
        &names[0..3],
        &["timestamp.json", "snapshot.json", "root.json"]
    );
    assert_eq!(
        &names[3..6],
        &["timestamp.json", "snapshot.json", "mirrors.json"]
    );
}

/// A rotated key with no new root published cannot be recovered from: every
/// attempt fails with `UnknownKey` until the loop gives up.
#[test]
fn rotation_without_new_root_fails_with_unknown_key() {
    let mut repo = TestRepo::new();
    repo.add_package("acme", "1.0", b"acme contents");
    repo.publish();

    let cache = TempDir::new().unwrap();
    let (client, _transport) = make_recording_client(&repo, cache.path());
    bootstrap(&client, &repo);
    client.check_for_updates(Some(repo.now())).unwrap();

    // Sign the timestamp with a key the root has never heard of, without
    // publishing a root that introduces it: keep the old root bytes on the
    // server after republishing.
    let old_root = std::fs::read(repo.dir.path().join("root.json")).unwrap();
    repo.timestamp_key = test_utils::key_from_seed(42);
    repo.timestamp_version += 1;
    repo.publish();
    std::fs::write(repo.dir.path().join("root.json"), &old_root).unwrap();

    let err = client.check_for_updates(Some(repo.now())).unwrap_err();
    match err {
        Error::Verification {
            source: VerificationError::Loop { history },
        } => {
            assert_eq!(history.len(), 5);
            match &history[0] {
                UpdateEvent::Verification(VerificationError::UnknownKey { path, .. }) => {
                    assert_eq!(path, "timestamp.json");
                }
                other => panic!("expected UnknownKey, got {:?}", other),
            }
        }
        other => panic!("expected Loop, got {:?}", other),
    }
}
