//! Provides the metadata objects that make up the repository's chain of trust.
//!
//! Five signed role files exist: root, timestamp, snapshot, mirrors, and
//! targets. Each is wrapped in an envelope carrying signatures over the raw
//! bytes of the payload. Payload parsing is strict: fields this client does
//! not know about are rejected. The envelope itself is tolerant, so future
//! signature schemes do not break old clients.

mod de;
pub mod decoded;
mod error;
pub mod key;

pub use crate::schema::error::{Error, Result};

use crate::schema::decoded::Decoded;
use crate::schema::key::Key;
use chrono::{DateTime, Utc};
use olpc_cjson::CanonicalFormatter;
use serde::{Deserialize, Serialize};
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{ensure, ResultExt};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;

/// The signature scheme this client implements. Signatures with any other
/// `method` are skipped as unverifiable.
pub const SIGNATURE_METHOD_ED25519: &str = "ed25519";

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other
    /// roles used in the system.
    Root,
    /// The timestamp role points at the current snapshot and is re-signed
    /// frequently to bound how long a client can be served stale data.
    Timestamp,
    /// The snapshot role lists the current root, mirrors, and package index
    /// files.
    Snapshot,
    /// The mirrors role lists servers the repository content can be fetched
    /// from.
    Mirrors,
    /// The targets role binds target names to lengths and hashes.
    Targets,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// All five cache-relevant roles, in chain-of-trust order.
pub(crate) const ALL_ROLES: [RoleType; 5] = [
    RoleType::Root,
    RoleType::Timestamp,
    RoleType::Snapshot,
    RoleType::Mirrors,
    RoleType::Targets,
];

/// Common trait implemented by all role payloads.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const TYPE: RoleType;

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    fn expires(&self) -> DateTime<Utc>;

    /// An integer greater than 0. Clients never replace a metadata file with
    /// one carrying a lower version.
    fn version(&self) -> NonZeroU64;

    /// Structural checks beyond what the deserializer enforces.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// A deterministic JSON serialization used when calculating digests of a
    /// metadata object.
    /// [More info on canonical JSON](http://wiki.laptop.org/go/Canonical_JSON)
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "role" })?;
        Ok(data)
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures over the role's raw bytes.
    pub signatures: Vec<Signature>,
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in root.json) that made this signature.
    pub keyid: Decoded,
    /// The signature scheme, e.g. `ed25519`.
    pub method: String,
    /// A hex-encoded signature over the raw bytes of the role.
    pub sig: Decoded,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The length of a file together with its digests. The length is
/// authoritative: a download is refused as soon as it runs past it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileInfo {
    /// The exact length of the file in bytes.
    pub length: u64,
    /// Digests of the file, keyed by algorithm name. `sha256` is required by
    /// this client; algorithms it does not implement are ignored.
    pub hashes: BTreeMap<String, Decoded>,
}

impl FileInfo {
    /// The SHA-256 digest, if listed.
    pub fn sha256(&self) -> Option<&Decoded> {
        self.hashes.get("sha256")
    }

    /// Builds a `FileInfo` from a length and a SHA-256 digest.
    pub fn with_sha256(length: u64, sha256: Vec<u8>) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_owned(), Decoded::from(sha256));
        Self { length, hashes }
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root role indicates which keys are authorized for all roles, including
/// the root role itself. Revocation and replacement of role keys is done by
/// publishing a new root file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Root {
    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when this root should be considered expired.
    pub expires: DateTime<Utc>,

    /// The key table. Every key ID is validated against its key during
    /// deserialization, and duplicates are rejected.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded, Key>,

    /// The key IDs and signature threshold for each role.
    pub roles: HashMap<RoleType, RoleKeys>,
}

/// The key IDs used for a role and the threshold of signatures required to
/// validate it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,
}

impl Root {
    /// The key declaration for a role.
    pub fn role_keys(&self, role: RoleType) -> Option<&RoleKeys> {
        self.roles.get(&role)
    }

    /// Looks a key up in the key table by its ID.
    pub fn key(&self, keyid: &Decoded) -> Option<&Key> {
        self.keys.get(keyid)
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }

    fn validate(&self) -> Result<()> {
        for role in &ALL_ROLES {
            ensure!(
                self.roles.contains_key(role),
                error::MissingRoleSnafu { role: *role }
            );
        }
        Ok(())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp role is re-signed on a short cadence and names the current
/// snapshot, bounding how long a client can unknowingly be served stale data.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Timestamp {
    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when this timestamp should be considered expired.
    pub expires: DateTime<Utc>,

    /// File info keyed by repository-relative path. Contains (only) the
    /// current snapshot.
    pub meta: HashMap<String, FileInfo>,
}

impl Timestamp {
    /// The file info recorded for a repository path, if present.
    pub fn file_info(&self, path: &str) -> Option<&FileInfo> {
        self.meta.get(path)
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot role lists the current root and mirrors files and the package
/// index archive (compressed, and optionally uncompressed).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when this snapshot should be considered expired.
    pub expires: DateTime<Utc>,

    /// File info keyed by repository-relative path.
    pub meta: HashMap<String, FileInfo>,
}

impl Snapshot {
    /// The file info recorded for a repository path, if present.
    pub fn file_info(&self, path: &str) -> Option<&FileInfo> {
        self.meta.get(path)
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The mirrors role lists servers from which the repository content can be
/// fetched.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Mirrors {
    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when this mirror list should be considered expired.
    pub expires: DateTime<Utc>,

    /// The mirror descriptions, in the repository's preference order.
    pub mirrors: Vec<Mirror>,
}

/// One mirror description.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Mirror {
    /// The base URL of the mirror.
    pub urlbase: String,

    /// What the mirror carries. Only `full` mirrors are used by this client;
    /// other content specifications are ignored.
    pub content: String,
}

/// The only mirror content specification this client recognizes.
pub const MIRROR_CONTENT_FULL: &str = "full";

impl Mirrors {
    /// The base URLs of all mirrors carrying the full repository, in order.
    pub fn full_mirrors(&self) -> impl Iterator<Item = &str> {
        self.mirrors
            .iter()
            .filter(|m| m.content == MIRROR_CONTENT_FULL)
            .map(|m| m.urlbase.as_str())
    }
}

impl Role for Mirrors {
    const TYPE: RoleType = RoleType::Mirrors;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A targets role binds target names to their file info. In this repository
/// format a targets file exists per package, inside the index archive.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Targets {
    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when this targets file should be considered expired.
    pub expires: DateTime<Utc>,

    /// File info keyed by target name.
    pub targets: HashMap<String, FileInfo>,
}

impl Targets {
    /// The file info for a target name.
    ///
    /// Returns [`crate::error::VerificationError::UnknownTarget`] wrapped in
    /// the crate error if the target is not listed.
    pub fn target_info(&self, name: &str) -> crate::error::Result<&FileInfo> {
        self.targets.get(name).ok_or_else(|| {
            crate::error::VerificationError::UnknownTarget {
                path: name.to_owned(),
            }
            .into()
        })
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expires() -> DateTime<Utc> {
        "2038-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn canonical_form_round_trips() {
        // A canonical input must come back out of parse + canonical_form
        // byte-for-byte.
        let input = r#"{"expires":"2038-01-01T00:00:00Z","meta":{"snapshot.json":{"hashes":{"sha256":"00ff"},"length":42}},"version":3}"#;
        let parsed: Timestamp = serde_json::from_str(input).unwrap();
        assert_eq!(parsed.version.get(), 3);
        assert_eq!(parsed.expires(), expires());
        let out = parsed.canonical_form().unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), input);
    }

    #[test]
    fn strict_payload_rejects_unknown_fields() {
        let input = r#"{"expires":"2038-01-01T00:00:00Z","meta":{},"sneaky":1,"version":3}"#;
        assert!(serde_json::from_str::<Timestamp>(input).is_err());
    }

    #[test]
    fn file_info_equality_is_byte_level() {
        let a = FileInfo::with_sha256(10, vec![1, 2, 3]);
        let b = FileInfo {
            length: 10,
            hashes: maplit::btreemap! { "sha256".to_owned() => Decoded::from(vec![1, 2, 3]) },
        };
        let c = FileInfo::with_sha256(11, vec![1, 2, 3]);
        let d = FileInfo::with_sha256(10, vec![9, 9, 9]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn mirrors_filter_to_full_content() {
        let mirrors = Mirrors {
            version: NonZeroU64::new(1).unwrap(),
            expires: expires(),
            mirrors: vec![
                Mirror {
                    urlbase: "https://a.example/".to_owned(),
                    content: "full".to_owned(),
                },
                Mirror {
                    urlbase: "https://b.example/".to_owned(),
                    content: "partial".to_owned(),
                },
            ],
        };
        let full: Vec<&str> = mirrors.full_mirrors().collect();
        assert_eq!(full, vec!["https://a.example/"]);
    }

    #[test]
    fn key_table_rejects_wrong_key_id() {
        // A root whose key table entry is keyed by something other than the
        // SHA-256 of the canonical key must not parse.
        let key = Key::Ed25519 {
            keyval: key::Ed25519Key {
                public: Decoded::from(vec![0u8; 32]),
            },
        };
        let good_id = key.key_id().unwrap().to_string();
        let template = r#"{
            "expires": "2038-01-01T00:00:00Z",
            "keys": {"KEYID": {"keytype": "ed25519", "keyval": {"public": "PUBLIC"}}},
            "roles": {
                "root": {"keyids": ["KEYID"], "threshold": 1},
                "timestamp": {"keyids": ["KEYID"], "threshold": 1},
                "snapshot": {"keyids": ["KEYID"], "threshold": 1},
                "mirrors": {"keyids": ["KEYID"], "threshold": 1},
                "targets": {"keyids": ["KEYID"], "threshold": 1}
            },
            "version": 1
        }"#
        .replace("PUBLIC", &hex::encode(vec![0u8; 32]));

        let good = template.replace("KEYID", &good_id);
        let root: Root = serde_json::from_str(&good).unwrap();
        assert!(root.validate().is_ok());

        let bad = template.replace("KEYID", &"0".repeat(64));
        assert!(serde_json::from_str::<Root>(&bad).is_err());
    }

    #[test]
    fn root_validate_requires_all_roles() {
        let key = Key::Ed25519 {
            keyval: key::Ed25519Key {
                public: Decoded::from(vec![0u8; 32]),
            },
        };
        let keyid = key.key_id().unwrap();
        let mut keys = HashMap::new();
        keys.insert(keyid.clone(), key);
        let mut roles = HashMap::new();
        roles.insert(
            RoleType::Root,
            RoleKeys {
                keyids: vec![keyid],
                threshold: NonZeroU64::new(1).unwrap(),
            },
        );
        let root = Root {
            version: NonZeroU64::new(1).unwrap(),
            expires: expires(),
            keys,
            roles,
        };
        assert!(root.validate().is_err());
    }
}
