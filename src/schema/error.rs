//! Errors that can occur while working with metadata objects themselves,
//! independent of any download or trust decision.

use crate::schema::RoleType;
use snafu::Snafu;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for metadata encoding and structural checks.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// Serializing a metadata object to canonical JSON failed.
    #[snafu(display("Failed to serialize {} to JSON: {}", what, source))]
    JsonSerialization {
        /// What was being serialized.
        what: String,
        /// The serializer's error.
        source: serde_json::Error,
    },

    /// A key table entry's ID does not match the key it maps to.
    #[snafu(display("Key ID '{}' does not match the calculated ID '{}'", keyid, calculated))]
    InvalidKeyId {
        /// The key ID as it appeared in the table.
        keyid: String,
        /// The ID calculated from the key itself.
        calculated: String,
    },

    /// The same key ID appears twice in a key table.
    #[snafu(display("Duplicate key ID '{}'", keyid))]
    DuplicateKeyId {
        /// The repeated key ID.
        keyid: String,
    },

    /// A root payload does not declare keys for one of the required roles.
    #[snafu(display("Root metadata declares no keys for role '{}'", role))]
    MissingRole {
        /// The role with no key declaration.
        role: RoleType,
    },
}
