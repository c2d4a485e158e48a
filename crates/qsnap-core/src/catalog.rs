//! Snapshot catalog parsed from an `info` response.

use std::collections::{BTreeMap, btree_map::Entry};

use crate::{
    error::SnapshotError,
    protocol::{KEY_SEPARATOR, Verb},
};

/// Mapping from snapshot name to offset (program counter at capture time).
///
/// Each `info` query yields a fresh catalog; nothing mutates one after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotCatalog {
    entries: BTreeMap<String, u64>,
}

impl SnapshotCatalog {
    /// Parse the newline-separated `name:hex-offset` records of an `info`
    /// response. Blank lines are skipped; an empty response is an empty catalog.
    ///
    /// # Errors
    /// Returns [`SnapshotError::MalformedResponse`] for a record without
    /// exactly one separator, with an empty name or an invalid hex offset,
    /// and for a name listed twice.
    pub fn parse(text: &str) -> Result<Self, SnapshotError> {
        let mut entries = BTreeMap::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut parts = line.split(KEY_SEPARATOR);
            let (Some(name), Some(offset), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(SnapshotError::malformed(
                    Verb::Info,
                    format!("record {line:?} is not name:offset"),
                ));
            };
            if name.is_empty() {
                return Err(SnapshotError::malformed(
                    Verb::Info,
                    format!("record {line:?} has an empty name"),
                ));
            }
            let offset = parse_offset(offset).ok_or_else(|| {
                SnapshotError::malformed(Verb::Info, format!("record {line:?} has an invalid offset"))
            })?;

            match entries.entry(name.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(offset);
                }
                Entry::Occupied(_) => {
                    return Err(SnapshotError::malformed(
                        Verb::Info,
                        format!("snapshot {name:?} listed twice"),
                    ));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Offset of a snapshot.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(name, offset)| (name.as_str(), *offset))
    }
}

fn parse_offset(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
