//! Reverse membership index: group -> members.
//!
//! A derived cache over the user store so that listing a group's members does
//! not scan every user. The user store is the source of truth; every change
//! to a membership goes through both. The default group is never indexed
//! because everyone belongs to it.

use std::collections::HashMap;

use crate::membership::Membership;
use crate::types::{UserId, DEFAULT_GROUP};
use crate::user::User;

/// Group name -> (user -> membership).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipIndex {
    by_group: HashMap<String, HashMap<UserId, Membership>>,
}

impl MembershipIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from user records alone.
    pub fn rebuild<'a>(users: impl IntoIterator<Item = &'a User>) -> Self {
        let mut index = Self::new();
        for user in users {
            for (group, membership) in &user.groups {
                index.insert(group, user.id, *membership);
            }
        }
        index
    }

    /// Record a membership.
    pub fn insert(&mut self, group: &str, user: UserId, membership: Membership) {
        if group == DEFAULT_GROUP {
            return;
        }
        self.by_group
            .entry(group.to_string())
            .or_default()
            .insert(user, membership);
    }

    /// Drop a membership. Returns whether it was indexed.
    pub fn remove(&mut self, group: &str, user: &UserId) -> bool {
        let Some(members) = self.by_group.get_mut(group) else {
            return false;
        };
        let removed = members.remove(user).is_some();
        if members.is_empty() {
            self.by_group.remove(group);
        }
        removed
    }

    /// Drop every membership of a group, returning the former members.
    pub fn remove_group(&mut self, group: &str) -> Vec<UserId> {
        self.by_group
            .remove(group)
            .map(|members| members.into_keys().collect())
            .unwrap_or_default()
    }

    /// The indexed membership of a user in a group.
    pub fn get(&self, group: &str, user: &UserId) -> Option<Membership> {
        self.by_group.get(group)?.get(user).copied()
    }

    /// All indexed members of a group, sorted by user id.
    pub fn members(&self, group: &str) -> Vec<(UserId, Membership)> {
        let mut members: Vec<(UserId, Membership)> = self
            .by_group
            .get(group)
            .map(|m| m.iter().map(|(id, ms)| (*id, *ms)).collect())
            .unwrap_or_default();
        members.sort_by_key(|(id, _)| *id);
        members
    }

    /// Number of indexed members of a group.
    pub fn member_count(&self, group: &str) -> usize {
        self.by_group.get(group).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_group_never_indexed() {
        let mut index = MembershipIndex::new();
        index.insert(DEFAULT_GROUP, UserId::NIL, Membership::Permanent);
        assert!(index.members(DEFAULT_GROUP).is_empty());
    }

    #[test]
    fn test_insert_remove() {
        let mut index = MembershipIndex::new();
        let alice = UserId::from_bytes([1; 16]);
        let bob = UserId::from_bytes([2; 16]);

        index.insert("vip", bob, Membership::Until(50));
        index.insert("vip", alice, Membership::Permanent);
        assert_eq!(
            index.members("vip"),
            vec![(alice, Membership::Permanent), (bob, Membership::Until(50))]
        );

        assert!(index.remove("vip", &alice));
        assert!(!index.remove("vip", &alice));
        assert_eq!(index.member_count("vip"), 1);

        assert_eq!(index.remove_group("vip"), vec![bob]);
        assert_eq!(index.member_count("vip"), 0);
    }

    #[test]
    fn test_rebuild_matches_users() {
        let mut user = User::new(UserId::from_bytes([3; 16]));
        user.groups.insert("vip".to_string(), Membership::Permanent);
        user.groups.insert(DEFAULT_GROUP.to_string(), Membership::Permanent);

        let index = MembershipIndex::rebuild([&user]);
        assert_eq!(index.get("vip", &user.id), Some(Membership::Permanent));
        assert_eq!(index.member_count(DEFAULT_GROUP), 0);
    }
}
