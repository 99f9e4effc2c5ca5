use crate::schema::decoded::Decoded;
use crate::schema::error::{self, Error};
use crate::schema::key::Key;
use serde::de::{Error as _, MapAccess, Visitor};
use serde::Deserializer;
use snafu::ensure;
use std::collections::HashMap;
use std::fmt;

/// Deserializes a root's key table, checking each entry as it streams in:
/// the table key must equal the ID calculated from the public key itself,
/// and no ID may appear twice. A table that fails either check never
/// produces a `Root` at all.
pub(super) fn deserialize_keys<'de, D>(
    deserializer: D,
) -> Result<HashMap<Decoded, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    fn checked_insert(
        table: &mut HashMap<Decoded, Key>,
        keyid: Decoded,
        key: Key,
    ) -> Result<(), Error> {
        let calculated = key.key_id()?;
        ensure!(
            keyid == calculated,
            error::InvalidKeyIdSnafu {
                keyid: keyid.to_string(),
                calculated: calculated.to_string(),
            }
        );
        let keyid_hex = keyid.to_string();
        ensure!(
            table.insert(keyid, key).is_none(),
            error::DuplicateKeyIdSnafu { keyid: keyid_hex }
        );
        Ok(())
    }

    struct KeyTableVisitor;

    impl<'de> Visitor<'de> for KeyTableVisitor {
        type Value = HashMap<Decoded, Key>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map of key IDs to public keys")
        }

        fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
            let mut table = HashMap::new();
            while let Some((keyid, key)) = access.next_entry()? {
                checked_insert(&mut table, keyid, key).map_err(M::Error::custom)?;
            }
            Ok(table)
        }
    }

    deserializer.deserialize_map(KeyTableVisitor)
}
