//! Public keys as they appear in root metadata.

use crate::schema::decoded::Decoded;
use crate::schema::error::{self, Result};
use aws_lc_rs::digest::{digest, SHA256};
use aws_lc_rs::signature;
use olpc_cjson::CanonicalFormatter;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

/// A public key, tagged with its type.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "keytype")]
#[non_exhaustive]
pub enum Key {
    /// An Ed25519 public key.
    #[serde(rename = "ed25519")]
    Ed25519 {
        /// The key material.
        keyval: Ed25519Key,
    },
}

/// An Ed25519 public key value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Ed25519Key {
    /// The hex-encoded public key bytes.
    pub public: Decoded,
}

impl Key {
    /// Calculates the key ID: the SHA-256 digest of the canonical JSON form of
    /// the public key.
    pub fn key_id(&self) -> Result<Decoded> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "key" })?;
        Ok(Decoded::from(digest(&SHA256, &buf).as_ref().to_vec()))
    }

    /// Verifies `sig` over `msg` with this key, returning `false` on any
    /// failure.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self {
            Key::Ed25519 { keyval } => {
                signature::UnparsedPublicKey::new(&signature::ED25519, keyval.public.as_bytes())
                    .verify(msg, sig)
                    .is_ok()
            }
        }
    }
}
