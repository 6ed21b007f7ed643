//! Groups: named bundles of permissions and metadata with a single parent.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_GROUP;

/// A named group.
///
/// `permissions` and `metadata` hold the group's own data only; inherited
/// values are computed by the [`GroupRegistry`](crate::GroupRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique name, the primary key.
    pub name: String,

    /// Name of the parent group.
    ///
    /// A group naming itself has no parent. For the default group that
    /// self-reference is the normal root encoding.
    pub parent: String,

    /// Own permission tokens.
    pub permissions: BTreeSet<String>,

    /// Own metadata values.
    pub metadata: BTreeMap<String, String>,

    /// Lower values win when several groups supply a single-valued attribute.
    pub priority: i32,
}

impl Group {
    /// Create an empty group under `parent`.
    pub fn new(name: impl Into<String>, parent: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            permissions: BTreeSet::new(),
            metadata: BTreeMap::new(),
            priority,
        }
    }

    /// The empty default group.
    pub fn default_group() -> Self {
        Self::new(DEFAULT_GROUP, DEFAULT_GROUP, 0)
    }

    /// Whether this is the default group.
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_GROUP
    }

    /// The parent name, or `None` for a root.
    pub fn parent_name(&self) -> Option<&str> {
        if self.parent == self.name {
            None
        } else {
            Some(&self.parent)
        }
    }

    /// Add a permission. Returns whether it was new.
    pub fn grant(&mut self, token: impl Into<String>) -> bool {
        self.permissions.insert(token.into())
    }

    /// Remove a permission. Returns whether it was present.
    pub fn revoke(&mut self, token: &str) -> bool {
        self.permissions.remove(token)
    }

    /// Set a metadata value. Returns whether the stored value changed.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        set_value(&mut self.metadata, key.into(), value.into())
    }

    /// Remove a metadata value. Returns whether it was present.
    pub fn unset_metadata(&mut self, key: &str) -> bool {
        self.metadata.remove(key).is_some()
    }

    /// Builder-style permission grant.
    pub fn with_permission(mut self, token: impl Into<String>) -> Self {
        self.grant(token);
        self
    }

    /// Builder-style metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }
}

/// Insert into a metadata map, reporting whether anything changed.
pub(crate) fn set_value(map: &mut BTreeMap<String, String>, key: String, value: String) -> bool {
    match map.get(&key) {
        Some(existing) if *existing == value => false,
        _ => {
            map.insert(key, value);
            true
        }
    }
}
