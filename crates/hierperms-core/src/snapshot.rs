//! Full engine state as exchanged with the persistence layer.
//!
//! Snapshots are plain data: group and user records keyed by their textual
//! names and ids. Nothing here is validated; see [`crate::loader`] for the
//! lenient load pass that turns a snapshot into live state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{PermsError, Result};
use crate::types::Millis;

/// A persisted group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Parent group name. Absent means the default group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub permissions: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i32,
}

/// A persisted user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub permissions: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    /// Group name -> expiration in epoch milliseconds, `None` for permanent.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, Option<Millis>>,
}

/// Groups and users keyed by name and textual id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub groups: BTreeMap<String, GroupRecord>,

    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PermsError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PermsError::Serialization(e.to_string()))
    }

    /// Serialize to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::Serialization(e.to_string()))
    }
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_omits_empty_fields() {
        let mut snapshot = Snapshot::new();
        snapshot.groups.insert("default".into(), GroupRecord::default());
        let json = snapshot.to_json().unwrap();

        assert!(!json.contains("priority"));
        assert!(!json.contains("parent"));
        assert_eq!(Snapshot::from_json(&json).unwrap(), snapshot);
    }

    #[test]
    fn test_json_accepts_sparse_records() {
        let json = r#"{
            "groups": { "vip": { "permissions": ["fly"], "priority": 3 } },
            "users": {
                "00000000-0000-0000-0000-000000000001": { "groups": { "vip": 1700000000000 } }
            }
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();

        let vip = &snapshot.groups["vip"];
        assert_eq!(vip.parent, None);
        assert_eq!(vip.priority, 3);
        let user = &snapshot.users["00000000-0000-0000-0000-000000000001"];
        assert_eq!(user.groups["vip"], Some(1_700_000_000_000));
    }

    #[test]
    fn test_cbor_roundtrip() {
        let mut snapshot = Snapshot::new();
        let mut user = UserRecord::default();
        user.groups.insert("vip".into(), None);
        user.permissions.insert("-fly".into());
        snapshot.users.insert("id".into(), user);

        let bytes = snapshot.to_cbor().unwrap();
        assert_eq!(Snapshot::from_cbor(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(
            Snapshot::from_json("not json"),
            Err(PermsError::Serialization(_))
        ));
        assert!(Snapshot::from_cbor(&[0xff, 0x00]).is_err());
    }
}
