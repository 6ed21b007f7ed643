//! The group registry.
//!
//! Owns every named group and resolves single-parent inheritance chains.
//! Chains end at a root, at a parent that is not registered, or at the first
//! group seen twice, so malformed hierarchies never loop.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::algebra::{merge, merge_metadata};
use crate::error::{PermsError, Result};
use crate::group::Group;
use crate::types::DEFAULT_GROUP;

/// A structural problem in the group hierarchy.
///
/// None of these are fatal; the affected chain just ends early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainAnomaly {
    /// The parent is not a registered group.
    DanglingParent { group: String, parent: String },
    /// A non-default group names itself as parent and is treated as a root.
    SelfParent { group: String },
    /// The group's ancestry leads back to itself.
    Cycle { group: String },
}

impl ChainAnomaly {
    /// The group whose chain is affected.
    pub fn group(&self) -> &str {
        match self {
            ChainAnomaly::DanglingParent { group, .. }
            | ChainAnomaly::SelfParent { group }
            | ChainAnomaly::Cycle { group } => group,
        }
    }
}

/// Whether `name` may name a group. Blank and whitespace-only names are refused.
pub fn valid_group_name(name: &str) -> bool {
    !name.trim().is_empty()
}

/// All groups, keyed by name.
#[derive(Debug, Clone)]
pub struct GroupRegistry {
    groups: HashMap<String, Group>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    /// Create a registry holding only the empty default group.
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        groups.insert(DEFAULT_GROUP.to_string(), Group::default_group());
        Self { groups }
    }

    /// Look up a group.
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Look up a group for modification.
    pub fn get_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    /// Whether a group with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// The default group.
    pub fn default_group(&self) -> Option<&Group> {
        self.groups.get(DEFAULT_GROUP)
    }

    /// Number of groups, the default group included.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Always false in practice, since the default group is always present.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterate over all groups in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// All group names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a new empty group.
    ///
    /// An unregistered parent is accepted; the group's chain ends there
    /// until such a parent is created.
    pub fn create_group(&mut self, name: &str, parent: &str, priority: i32) -> Result<&Group> {
        if !valid_group_name(name) {
            return Err(PermsError::InvalidName(name.to_string()));
        }
        if self.groups.contains_key(name) {
            return Err(PermsError::AlreadyExists(name.to_string()));
        }
        if parent != name && !self.groups.contains_key(parent) {
            tracing::warn!("group '{}' created under undefined parent '{}'", name, parent);
        }

        let group: &Group = self
            .groups
            .entry(name.to_string())
            .or_insert(Group::new(name, parent, priority));
        Ok(group)
    }

    /// Insert or replace a group as-is. Used when loading state.
    pub fn insert(&mut self, group: Group) -> Option<Group> {
        self.groups.insert(group.name.clone(), group)
    }

    /// Remove a group. Returns whether a group was removed.
    ///
    /// The default group cannot be removed.
    pub fn delete_group(&mut self, name: &str) -> Result<bool> {
        if name == DEFAULT_GROUP {
            return Err(PermsError::Protected(name.to_string()));
        }
        Ok(self.groups.remove(name).is_some())
    }

    /// Re-parent a group. Returns whether the parent changed.
    pub fn set_parent(&mut self, name: &str, parent: &str) -> Result<bool> {
        if name == DEFAULT_GROUP {
            return Err(PermsError::Protected(name.to_string()));
        }
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| PermsError::GroupNotFound(name.to_string()))?;
        if group.parent == parent {
            return Ok(false);
        }
        group.parent = parent.to_string();
        Ok(true)
    }

    /// Change a group's priority. Returns whether it changed.
    pub fn set_priority(&mut self, name: &str, priority: i32) -> Result<bool> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| PermsError::GroupNotFound(name.to_string()))?;
        if group.priority == priority {
            return Ok(false);
        }
        group.priority = priority;
        Ok(true)
    }

    /// The group followed by its ancestors, nearest first.
    pub fn chain<'a>(&'a self, group: &'a Group) -> Vec<&'a Group> {
        let mut chain = vec![group];
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(group.name.as_str());

        let mut current = group;
        while let Some(parent_name) = current.parent_name() {
            if !visited.insert(parent_name) {
                break;
            }
            match self.groups.get(parent_name) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent;
                }
                None => break,
            }
        }

        chain
    }

    /// Permissions of a group, optionally with everything it inherits.
    pub fn effective_permissions(&self, group: &Group, inherit: bool) -> BTreeSet<String> {
        if !inherit {
            return group.permissions.clone();
        }
        merge(self.chain(group).into_iter().map(|g| &g.permissions))
    }

    /// Metadata of a group, optionally with everything it inherits.
    ///
    /// Merged root first, so the group's own values override its parent's,
    /// which override more distant ancestors.
    pub fn effective_metadata(&self, group: &Group, inherit: bool) -> BTreeMap<String, String> {
        if !inherit {
            return group.metadata.clone();
        }
        merge_metadata(self.chain(group).into_iter().rev().map(|g| &g.metadata))
    }

    /// The value offered by the lowest-priority candidate.
    ///
    /// Ties go to the earliest candidate, not the last one offered. Users
    /// pass their memberships in group name order, so among equal
    /// priorities the alphabetically first group wins.
    pub fn priority_winner<'g, V>(
        candidates: impl IntoIterator<Item = (&'g Group, V)>,
    ) -> Option<V> {
        candidates
            .into_iter()
            .min_by_key(|(group, _)| group.priority)
            .map(|(_, value)| value)
    }

    /// Structural problems in the hierarchy, in group name order.
    pub fn anomalies(&self) -> Vec<ChainAnomaly> {
        let mut anomalies = Vec::new();

        for name in self.names() {
            let Some(group) = self.groups.get(&name) else {
                continue;
            };

            match group.parent_name() {
                None if !group.is_default() => {
                    anomalies.push(ChainAnomaly::SelfParent { group: name.clone() });
                }
                Some(parent) if !self.groups.contains_key(parent) => {
                    anomalies.push(ChainAnomaly::DanglingParent {
                        group: name.clone(),
                        parent: parent.to_string(),
                    });
                }
                _ => {}
            }

            if self.on_cycle(group) {
                anomalies.push(ChainAnomaly::Cycle { group: name });
            }
        }

        anomalies
    }

    /// Whether following parents from `group` leads back to it.
    fn on_cycle(&self, group: &Group) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = group;
        while let Some(parent_name) = current.parent_name() {
            if parent_name == group.name {
                return true;
            }
            if !visited.insert(parent_name) {
                return false;
            }
            match self.groups.get(parent_name) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }
}
