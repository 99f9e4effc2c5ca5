//! The trust layer: wrappers that witness which checks a piece of metadata
//! has passed, and the functions that perform those checks.
//!
//! Values move through three states. *Raw* bytes carry no claims. A
//! [`Verified`] value has had its signatures checked against a key set and
//! threshold. A [`Trusted`] value has additionally passed version
//! monotonicity and (when the caller supplied a clock) freshness checks.
//! Neither wrapper can be constructed outside this module except at the two
//! designated entry points: bootstrap installation and loading from the local
//! cache.
//!
//! Signatures are checked over the raw on-the-wire bytes of the `signed`
//! field, never over a re-serialization.

use crate::error::{
    DeserializationKind, Result, UnknownKeySnafu, VerificationError,
};
use crate::schema::decoded::Decoded;
use crate::schema::key::Key;
use crate::schema::{Role, RoleKeys, Root, Signature, Signed, SIGNATURE_METHOD_ED25519};
use chrono::{DateTime, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use snafu::ensure;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;

/// The signed envelope with the payload left as raw bytes, exactly as found
/// on the wire.
#[derive(Debug, serde::Deserialize)]
struct Envelope {
    signed: Box<RawValue>,
    signatures: Vec<Signature>,
}

/// Metadata whose signatures have been checked against a key set and
/// threshold.
#[derive(Debug, Clone)]
pub struct Verified<T> {
    inner: T,
}

impl<T> Verified<T> {
    fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Designated entry point: bootstrap installs a signature-verified root
    /// as the trust anchor without version or freshness history to compare
    /// against.
    pub fn into_trusted(self) -> Trusted<T> {
        Trusted::new(self.inner)
    }
}

impl<T> Deref for Verified<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Metadata that has passed signature checks plus version monotonicity and,
/// when a clock was supplied, freshness.
///
/// Projections of trusted data are trusted: methods of the payload are
/// reachable through `Deref` and operate on the checked value.
#[derive(Debug, Clone)]
pub struct Trusted<T> {
    inner: T,
}

impl<T> Trusted<T> {
    fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Designated entry point: values read back from the local cache were
    /// fully checked before they were written and are trusted as-is.
    pub(crate) fn trust_cached(inner: T) -> Self {
        Self { inner }
    }
}

impl<T> Deref for Trusted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Verifies a role file against the trusted root.
///
/// The checks run in a fixed order: signatures first, then version
/// monotonicity (when `min_version` is supplied), then freshness (when `now`
/// is supplied). The ordering matters: an expired-but-validly-signed file and
/// an unexpired-but-invalidly-signed file must produce different errors.
pub fn verify_role<T>(
    root: &Trusted<Root>,
    path: &str,
    min_version: Option<u64>,
    now: Option<DateTime<Utc>>,
    raw: &[u8],
) -> std::result::Result<Trusted<T>, VerificationError>
where
    T: Role + DeserializeOwned,
{
    let envelope = parse_envelope(path, raw)?;
    let role_keys = root.role_keys(T::TYPE).ok_or_else(|| {
        VerificationError::SignaturesMissing {
            path: path.to_owned(),
        }
    })?;
    check_signatures(
        path,
        &root.keys,
        role_keys,
        envelope.signed.get().as_bytes(),
        &envelope.signatures,
    )?;

    let signed: T = parse_payload(path, &envelope.signed)?;
    signed.validate().map_err(|e| schema_violation(path, &e))?;

    if let Some(min) = min_version {
        let got = signed.version().get();
        ensure!(
            got >= min,
            crate::error::VersionTooLowSnafu { path, got, min }
        );
    }

    if let Some(now) = now {
        ensure!(signed.expires() > now, crate::error::ExpiredSnafu { path });
    }

    Ok(Trusted::new(signed))
}

/// Verifies a candidate root against out-of-band key fingerprints, for
/// bootstrap. Signatures count towards the threshold only when their key ID
/// is in the trusted set; the keys themselves are resolved from the candidate
/// root's own key table. A threshold of 0 is trust-on-first-use.
pub fn verify_fingerprints(
    trusted_keyids: &[Decoded],
    threshold: u64,
    path: &str,
    raw: &[u8],
) -> std::result::Result<Verified<Root>, VerificationError> {
    let envelope = parse_envelope(path, raw)?;
    let root: Root = parse_payload(path, &envelope.signed)?;
    root.validate().map_err(|e| schema_violation(path, &e))?;

    let signed_bytes = envelope.signed.get().as_bytes();
    let mut valid: Vec<&Decoded> = Vec::new();
    for signature in &envelope.signatures {
        if signature.method != SIGNATURE_METHOD_ED25519 {
            debug!(
                "skipping signature on '{}' with unrecognized method '{}'",
                path, signature.method
            );
            continue;
        }
        if !trusted_keyids.contains(&signature.keyid) {
            continue;
        }
        let key = root
            .key(&signature.keyid)
            .ok_or_else(|| UnknownKeySnafu {
                path,
                keyid: signature.keyid.to_string(),
            }.build())?;
        if key.verify(signed_bytes, &signature.sig) {
            ensure!(
                !valid.contains(&&signature.keyid),
                crate::error::SignaturesNotUniqueSnafu { path }
            );
            valid.push(&signature.keyid);
        }
    }
    ensure!(
        valid.len() as u64 >= threshold,
        crate::error::SignaturesMissingSnafu { path }
    );

    Ok(Verified::new(root))
}

/// Designated entry point: parses a file that is already trusted because it
/// lives in the local cache (or inside the validated index archive). Parse
/// failures are reported as local corruption, not verification failures.
pub(crate) fn parse_cached<T>(path: &Path, bytes: &[u8]) -> Result<Trusted<T>>
where
    T: Role + DeserializeOwned,
{
    let corrupted = |detail: String| crate::error::Error::LocalFileCorrupted {
        path: path.to_owned(),
        detail,
    };
    let signed: Signed<T> =
        serde_json::from_slice(bytes).map_err(|e| corrupted(e.to_string()))?;
    signed
        .signed
        .validate()
        .map_err(|e| corrupted(e.to_string()))?;
    Ok(Trusted::trust_cached(signed.signed))
}

/// Checks the envelope's signatures against a key table and a role's key
/// declaration. Order of checks within a signature:
///
/// 1. unrecognized methods are skipped as unverifiable;
/// 2. a key ID missing from the key table is an error (`UnknownKey`);
/// 3. known keys that are not declared for this role are dropped;
/// 4. cryptographic verification runs over the raw `signed` bytes.
///
/// Two valid signatures from one key are an error; fewer distinct valid keys
/// than the threshold is an error.
fn check_signatures(
    path: &str,
    keys: &HashMap<Decoded, Key>,
    role_keys: &RoleKeys,
    signed_bytes: &[u8],
    signatures: &[Signature],
) -> std::result::Result<(), VerificationError> {
    let mut valid: Vec<&Decoded> = Vec::new();
    for signature in signatures {
        if signature.method != SIGNATURE_METHOD_ED25519 {
            debug!(
                "skipping signature on '{}' with unrecognized method '{}'",
                path, signature.method
            );
            continue;
        }
        let key = keys.get(&signature.keyid).ok_or_else(|| {
            UnknownKeySnafu {
                path,
                keyid: signature.keyid.to_string(),
            }
            .build()
        })?;
        if !role_keys.keyids.contains(&signature.keyid) {
            debug!(
                "dropping signature on '{}' from key '{}' not declared for this role",
                path, signature.keyid
            );
            continue;
        }
        if key.verify(signed_bytes, &signature.sig) {
            ensure!(
                !valid.contains(&&signature.keyid),
                crate::error::SignaturesNotUniqueSnafu { path }
            );
            valid.push(&signature.keyid);
        } else {
            debug!(
                "signature on '{}' from key '{}' failed cryptographic verification",
                path, signature.keyid
            );
        }
    }
    ensure!(
        valid.len() as u64 >= role_keys.threshold.get(),
        crate::error::SignaturesMissingSnafu { path }
    );
    Ok(())
}

fn parse_envelope(
    path: &str,
    raw: &[u8],
) -> std::result::Result<Envelope, VerificationError> {
    serde_json::from_slice(raw).map_err(|e| deserialization_error(path, &e))
}

fn parse_payload<T: DeserializeOwned>(
    path: &str,
    raw: &RawValue,
) -> std::result::Result<T, VerificationError> {
    serde_json::from_str(raw.get()).map_err(|e| deserialization_error(path, &e))
}

fn deserialization_error(path: &str, e: &serde_json::Error) -> VerificationError {
    let kind = match e.classify() {
        serde_json::error::Category::Data => DeserializationKind::SchemaViolation,
        _ => DeserializationKind::MalformedJson,
    };
    VerificationError::Deserialization {
        path: path.to_owned(),
        kind,
        detail: e.to_string(),
    }
}

fn schema_violation(path: &str, e: &crate::schema::Error) -> VerificationError {
    VerificationError::Deserialization {
        path: path.to_owned(),
        kind: DeserializationKind::SchemaViolation,
        detail: e.to_string(),
    }
}
