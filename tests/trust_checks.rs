// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The trust layer's verification semantics, exercised directly on signed
//! bytes.


use staunch::error::VerificationError;
use staunch::schema::{Timestamp, SIGNATURE_METHOD_ED25519};
use staunch::trust::{self, Trusted};
use staunch::schema::Root;
use std::collections::HashMap;
use test_utils::{
    canonical, datetime, file_info, key_from_seed, key_id, sign_envelope, TestRepo,
};

/// A trusted root for direct trust-layer tests, produced through the
/// bootstrap entry point.
fn trusted_root(repo: &TestRepo) -> Trusted<Root> {
    let bytes = sign_envelope(repo.root_payload(), &[&repo.root_key]);
    trust::verify_fingerprints(&repo.root_key_ids(), 1, "root.json", &bytes)
        .unwrap()
        .into_trusted()
}

fn timestamp(repo: &TestRepo, version: u64, expires: &str) -> Timestamp {
    let mut meta = HashMap::new();
    meta.insert("snapshot.json".to_owned(), file_info(b"snapshot bytes"));
    Timestamp {
        version: test_utils::version(version),
        expires: datetime(expires),
        meta,
    }
}

/// Signature checks run before freshness checks: an expired file with good
/// signatures reports `Expired`, while a fresh file with bad signatures
/// reports the signature problem.
#[test]
fn signature_checks_precede_expiry() {
    let repo = TestRepo::new();
    let root = trusted_root(&repo);
    let now = Some(datetime("2030-01-01T00:00:00Z"));

    // Validly signed but expired.
    let stale = sign_envelope(
        timestamp(&repo, 1, "2029-01-01T00:00:00Z"),
        &[&repo.timestamp_key],
    );
    let err = trust::verify_role::<Timestamp>(&root, "timestamp.json", None, now, &stale)
        .unwrap_err();
    assert!(matches!(err, VerificationError::Expired { .. }), "got {:?}", err);

    // Unexpired but signed by the wrong (declared, known) key.
    let forged = sign_envelope(
        timestamp(&repo, 1, "2031-01-01T00:00:00Z"),
        &[&repo.snapshot_key],
    );
    let err = trust::verify_role::<Timestamp>(&root, "timestamp.json", None, now, &forged)
        .unwrap_err();
    assert!(
        matches!(err, VerificationError::SignaturesMissing { .. }),
        "got {:?}",
        err
    );
}

#[test]
fn version_rollback_is_rejected() {
    let repo = TestRepo::new();
    let root = trusted_root(&repo);

    let bytes = sign_envelope(
        timestamp(&repo, 3, "2031-01-01T00:00:00Z"),
        &[&repo.timestamp_key],
    );
    // Equal versions are allowed; going backwards is not.
    assert!(trust::verify_role::<Timestamp>(&root, "timestamp.json", Some(3), None, &bytes).is_ok());
    let err = trust::verify_role::<Timestamp>(&root, "timestamp.json", Some(4), None, &bytes)
        .unwrap_err();
    match err {
        VerificationError::VersionTooLow { got, min, .. } => {
            assert_eq!(got, 3);
            assert_eq!(min, 4);
        }
        other => panic!("expected VersionTooLow, got {:?}", other),
    }
}

#[test]
fn duplicate_signatures_from_one_key_are_rejected() {
    let repo = TestRepo::new();
    let root = trusted_root(&repo);

    let bytes = sign_envelope(
        timestamp(&repo, 1, "2031-01-01T00:00:00Z"),
        &[&repo.timestamp_key, &repo.timestamp_key],
    );
    let err = trust::verify_role::<Timestamp>(&root, "timestamp.json", None, None, &bytes)
        .unwrap_err();
    assert!(
        matches!(err, VerificationError::SignaturesNotUnique { .. }),
        "got {:?}",
        err
    );
}

#[test]
fn signature_from_unknown_key_is_an_error() {
    let repo = TestRepo::new();
    let root = trusted_root(&repo);

    let stranger = key_from_seed(77);
    let bytes = sign_envelope(
        timestamp(&repo, 1, "2031-01-01T00:00:00Z"),
        &[&stranger],
    );
    let err = trust::verify_role::<Timestamp>(&root, "timestamp.json", None, None, &bytes)
        .unwrap_err();
    match err {
        VerificationError::UnknownKey { keyid, .. } => {
            assert_eq!(keyid, key_id(&stranger).to_string());
        }
        other => panic!("expected UnknownKey, got {:?}", other),
    }
}

/// Signatures with methods this client does not implement are skipped, and
/// the remaining signatures still satisfy the threshold.
#[test]
fn unrecognized_signature_methods_are_skipped() {
    let repo = TestRepo::new();
    let root = trusted_root(&repo);

    let payload = timestamp(&repo, 1, "2031-01-01T00:00:00Z");
    let payload_bytes = canonical(&payload);
    let sig = repo.timestamp_key.sign(&payload_bytes);
    let envelope = format!(
        r#"{{"signatures":[{{"keyid":"{keyid}","method":"sphincs+","sig":"00"}},{{"keyid":"{keyid}","method":"{method}","sig":"{sig}"}}],"signed":{payload}}}"#,
        keyid = key_id(&repo.timestamp_key),
        method = SIGNATURE_METHOD_ED25519,
        sig = hex::encode(sig.as_ref()),
        payload = String::from_utf8(payload_bytes.clone()).unwrap(),
    );
    assert!(trust::verify_role::<Timestamp>(
        &root,
        "timestamp.json",
        None,
        None,
        envelope.as_bytes()
    )
    .is_ok());
}

/// Signatures cover the raw bytes of `signed` as they appear on the wire,
/// not a canonical re-serialization.
#[test]
fn signatures_cover_raw_wire_bytes() {
    let repo = TestRepo::new();
    let root = trusted_root(&repo);

    // A payload with whitespace canonical JSON would never contain.
    let spaced = r#"{"expires": "2031-01-01T00:00:00Z", "meta": {}, "version": 1}"#;
    let sig = repo.timestamp_key.sign(spaced.as_bytes());
    let envelope = format!(
        r#"{{"signatures":[{{"keyid":"{keyid}","method":"ed25519","sig":"{sig}"}}],"signed":{spaced}}}"#,
        keyid = key_id(&repo.timestamp_key),
        sig = hex::encode(sig.as_ref()),
        spaced = spaced,
    );
    assert!(trust::verify_role::<Timestamp>(
        &root,
        "timestamp.json",
        None,
        None,
        envelope.as_bytes()
    )
    .is_ok());

    // The same signature over a canonicalized copy of the payload must fail:
    // the wire bytes are what was signed.
    let canonical_payload = r#"{"expires":"2031-01-01T00:00:00Z","meta":{},"version":1}"#;
    let envelope = format!(
        r#"{{"signatures":[{{"keyid":"{keyid}","method":"ed25519","sig":"{sig}"}}],"signed":{payload}}}"#,
        keyid = key_id(&repo.timestamp_key),
        sig = hex::encode(sig.as_ref()),
        payload = canonical_payload,
    );
    let err = trust::verify_role::<Timestamp>(
        &root,
        "timestamp.json",
        None,
        None,
        envelope.as_bytes(),
    )
    .unwrap_err();
    assert!(
        matches!(err, VerificationError::SignaturesMissing { .. }),
        "got {:?}",
        err
    );
}

/// Looking up a target that the targets metadata does not list reports the
/// target path.
#[test]
fn unknown_target_lookup() {
    let targets = staunch::schema::Targets {
        version: test_utils::version(1),
        expires: datetime("2031-01-01T00:00:00Z"),
        targets: HashMap::new(),
    };
    let err = targets.target_info("ghost-0.1.tar.gz").unwrap_err();
    match err {
        staunch::error::Error::Verification {
            source: VerificationError::UnknownTarget { path },
        } => assert_eq!(path, "ghost-0.1.tar.gz"),
        other => panic!("expected UnknownTarget, got {:?}", other),
    }
}

/// Parse failures distinguish malformed JSON from schema violations.
#[test]
fn parse_failures_are_classified() {
    let repo = TestRepo::new();
    let root = trusted_root(&repo);

    let err = trust::verify_role::<Timestamp>(&root, "timestamp.json", None, None, b"{nope")
        .unwrap_err();
    match err {
        VerificationError::Deserialization { kind, .. } => {
            assert_eq!(kind, staunch::error::DeserializationKind::MalformedJson);
        }
        other => panic!("expected Deserialization, got {:?}", other),
    }

    // Well-formed JSON, wrong shape: an unknown payload field.
    let payload = r#"{"expires":"2031-01-01T00:00:00Z","meta":{},"sneaky":1,"version":1}"#;
    let sig = repo.timestamp_key.sign(payload.as_bytes());
    let envelope = format!(
        r#"{{"signatures":[{{"keyid":"{keyid}","method":"ed25519","sig":"{sig}"}}],"signed":{payload}}}"#,
        keyid = key_id(&repo.timestamp_key),
        sig = hex::encode(sig.as_ref()),
        payload = payload,
    );
    let err = trust::verify_role::<Timestamp>(
        &root,
        "timestamp.json",
        None,
        None,
        envelope.as_bytes(),
    )
    .unwrap_err();
    match err {
        VerificationError::Deserialization { kind, .. } => {
            assert_eq!(kind, staunch::error::DeserializationKind::SchemaViolation);
        }
        other => panic!("expected Deserialization, got {:?}", other),
    }
}
