//! Users and the user store.
//!
//! The user store owns every user's direct grants and group memberships and
//! keeps the [`MembershipIndex`] in step with them. Effective permissions and
//! metadata are computed by composing a user with the [`GroupRegistry`].
//!
//! ## Expiry
//!
//! Expired memberships are never swept in the background. Every read that
//! walks a user's memberships notes the expired ones; the `&mut self`
//! methods prune them on the spot, while the `resolve_*` methods only report
//! them in [`Resolved::stale`] so a caller holding a shared lock can prune
//! later with [`UserStore::prune`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::algebra::{matches_all, merge, merge_metadata, WildcardPrecedence};
use crate::error::{PermsError, Result};
use crate::group::{set_value, Group};
use crate::index::MembershipIndex;
use crate::membership::Membership;
use crate::registry::GroupRegistry;
use crate::types::{Millis, UserId, DEFAULT_GROUP};

/// A user's own data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    /// Own permission tokens.
    pub permissions: BTreeSet<String>,

    /// Own metadata. Overrides anything inherited from groups.
    pub metadata: BTreeMap<String, String>,

    /// Explicit memberships. The default group is implicit and not listed.
    pub groups: BTreeMap<String, Membership>,
}

impl User {
    /// A user with no grants and no explicit memberships.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            permissions: BTreeSet::new(),
            metadata: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    /// Whether the record carries no data at all.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.metadata.is_empty() && self.groups.is_empty()
    }

    /// Memberships that apply at `now`.
    pub fn live_groups(&self, now: Millis) -> impl Iterator<Item = (&str, Membership)> {
        self.groups
            .iter()
            .filter(move |(_, m)| m.is_live(now))
            .map(|(name, m)| (name.as_str(), *m))
    }

    /// Names of memberships that have expired at `now`.
    pub fn expired_groups(&self, now: Millis) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, m)| !m.is_live(now))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// A membership found expired during a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleMembership {
    pub user: UserId,
    pub group: String,
}

/// A value computed without mutating the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    /// The computed value, already excluding expired memberships.
    pub value: T,

    /// Expired memberships noticed along the way, still to be pruned.
    pub stale: Vec<StaleMembership>,
}

impl<T> Resolved<T> {
    fn new(value: T, stale: Vec<StaleMembership>) -> Self {
        Self { value, stale }
    }

    /// Whether any expired membership was noticed.
    pub fn has_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    /// Transform the value, keeping the stale list.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            stale: self.stale,
        }
    }
}

/// Members of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members {
    /// The default group: every identity is a member.
    Everyone,
    /// Explicit live members, sorted by user id.
    Listed(Vec<(UserId, Membership)>),
}

/// All users plus the reverse membership index.
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: HashMap<UserId, User>,
    index: MembershipIndex,
}

impl UserStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a user, creating an empty record if none exists.
    pub fn get_user(&mut self, id: UserId) -> &User {
        self.entry(id)
    }

    /// Get a user without creating one.
    pub fn find_user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    /// Insert or replace a whole user record. Used when loading state.
    pub fn insert_user(&mut self, user: User) {
        if let Some(old) = self.users.remove(&user.id) {
            for group in old.groups.keys() {
                self.index.remove(group, &old.id);
            }
        }
        for (group, membership) in &user.groups {
            self.index.insert(group, user.id, *membership);
        }
        self.users.insert(user.id, user);
    }

    /// Remove a user and their index entries. Returns whether one existed.
    pub fn remove_user(&mut self, id: &UserId) -> bool {
        let Some(user) = self.users.remove(id) else {
            return false;
        };
        for group in user.groups.keys() {
            self.index.remove(group, id);
        }
        true
    }

    /// Remove every membership in a group. Returns how many were removed.
    pub fn purge_group(&mut self, group: &str) -> usize {
        let mut removed = 0;
        for id in self.index.remove_group(group) {
            if let Some(user) = self.users.get_mut(&id) {
                if user.groups.remove(group).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Iterate over all user records.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Number of user records.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the store holds no user records.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// The reverse membership index.
    pub fn index(&self) -> &MembershipIndex {
        &self.index
    }

    fn entry(&mut self, id: UserId) -> &mut User {
        self.users.entry(id).or_insert_with(|| User::new(id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Direct grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant a permission directly. Returns whether it was new.
    pub fn grant_permission(&mut self, id: UserId, token: impl Into<String>) -> bool {
        self.entry(id).permissions.insert(token.into())
    }

    /// Revoke a direct permission. Returns whether it was present.
    pub fn revoke_permission(&mut self, id: &UserId, token: &str) -> bool {
        self.users
            .get_mut(id)
            .map_or(false, |user| user.permissions.remove(token))
    }

    /// Set a direct metadata value. Returns whether the stored value changed.
    pub fn set_metadata(
        &mut self,
        id: UserId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> bool {
        set_value(&mut self.entry(id).metadata, key.into(), value.into())
    }

    /// Remove a direct metadata value. Returns whether it was present.
    pub fn unset_metadata(&mut self, id: &UserId, key: &str) -> bool {
        self.users
            .get_mut(id)
            .map_or(false, |user| user.metadata.remove(key).is_some())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a user to a group.
    ///
    /// Returns `false` without changing anything when the user is already a
    /// live member, when the group is the default group, or when the
    /// requested membership has already expired. An expired record for the
    /// same group is replaced.
    pub fn join_group(
        &mut self,
        registry: &GroupRegistry,
        id: UserId,
        group: &str,
        membership: Membership,
        now: Millis,
    ) -> Result<bool> {
        if !registry.contains(group) {
            return Err(PermsError::GroupNotFound(group.to_string()));
        }
        if group == DEFAULT_GROUP || !membership.is_live(now) {
            return Ok(false);
        }

        let user = self.entry(id);
        if let Some(existing) = user.groups.get(group) {
            if existing.is_live(now) {
                return Ok(false);
            }
        }
        user.groups.insert(group.to_string(), membership);
        self.index.insert(group, id, membership);
        Ok(true)
    }

    /// Remove a user from a group. Returns whether a membership was removed.
    pub fn leave_group(&mut self, id: &UserId, group: &str) -> bool {
        let removed = self
            .users
            .get_mut(id)
            .map_or(false, |user| user.groups.remove(group).is_some());
        if removed {
            self.index.remove(group, id);
        }
        removed
    }

    /// Drop the listed memberships if they are still expired at `now`.
    ///
    /// Returns how many were removed. A membership renewed since it was
    /// reported is left alone.
    pub fn prune(&mut self, stale: &[StaleMembership], now: Millis) -> usize {
        let mut pruned = 0;
        for entry in stale {
            let Some(user) = self.users.get_mut(&entry.user) else {
                continue;
            };
            let expired = user
                .groups
                .get(&entry.group)
                .map_or(false, |m| !m.is_live(now));
            if expired {
                user.groups.remove(&entry.group);
                self.index.remove(&entry.group, &entry.user);
                tracing::debug!("pruned expired membership of {} in '{}'", entry.user, entry.group);
                pruned += 1;
            }
        }
        pruned
    }

    /// Drop every expired membership of every user.
    pub fn prune_all(&mut self, now: Millis) -> usize {
        let stale: Vec<StaleMembership> = self
            .users
            .values()
            .flat_map(|user| {
                user.expired_groups(now).into_iter().map(|group| StaleMembership {
                    user: user.id,
                    group,
                })
            })
            .collect();
        self.prune(&stale, now)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read-only resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Effective permissions without pruning.
    pub fn resolve_permissions(
        &self,
        registry: &GroupRegistry,
        id: &UserId,
        inherit: bool,
        now: Millis,
    ) -> Resolved<BTreeSet<String>> {
        let user = self.users.get(id);
        let own = user.map(|u| u.permissions.clone()).unwrap_or_default();
        if !inherit {
            return Resolved::new(own, Vec::new());
        }

        let (groups, stale) = self.contributing_groups(registry, id, now);
        let inherited = groups
            .into_iter()
            .map(|g| registry.effective_permissions(g, true))
            .collect::<Vec<_>>();

        let value = merge(std::iter::once(own).chain(inherited));
        Resolved::new(value, stale)
    }

    /// Effective metadata without pruning.
    ///
    /// Sources are applied default group first, then each live membership in
    /// group name order, then the user's own values, later ones winning.
    pub fn resolve_metadata(
        &self,
        registry: &GroupRegistry,
        id: &UserId,
        inherit: bool,
        now: Millis,
    ) -> Resolved<BTreeMap<String, String>> {
        let own = self
            .users
            .get(id)
            .map(|u| u.metadata.clone())
            .unwrap_or_default();
        if !inherit {
            return Resolved::new(own, Vec::new());
        }

        let (groups, stale) = self.contributing_groups(registry, id, now);
        let mut sources: Vec<BTreeMap<String, String>> = groups
            .into_iter()
            .map(|g| registry.effective_metadata(g, true))
            .collect();
        sources.push(own);

        Resolved::new(merge_metadata(sources), stale)
    }

    /// A single-valued metadata key resolved by group priority.
    ///
    /// The user's own non-empty value wins. Otherwise the value comes from
    /// the live membership group with the lowest priority, considering each
    /// group's inherited metadata and ignoring empty values. The default
    /// group only answers when no membership offers a value.
    pub fn resolve_ranked_metadata(
        &self,
        registry: &GroupRegistry,
        id: &UserId,
        key: &str,
        now: Millis,
    ) -> Resolved<Option<String>> {
        let (groups, stale) = self.contributing_groups(registry, id, now);

        let own = self
            .users
            .get(id)
            .and_then(|u| u.metadata.get(key))
            .filter(|v| !v.is_empty())
            .cloned();
        if own.is_some() {
            return Resolved::new(own, stale);
        }

        let offered = |g: &Group| {
            registry
                .effective_metadata(g, true)
                .remove(key)
                .filter(|v| !v.is_empty())
        };
        let (fallback, joined): (Vec<&Group>, Vec<&Group>) =
            groups.into_iter().partition(|g| g.is_default());

        let candidates: Vec<(&Group, String)> = joined
            .into_iter()
            .filter_map(|g| offered(g).map(|v| (g, v)))
            .collect();
        let value = GroupRegistry::priority_winner(candidates)
            .or_else(|| fallback.into_iter().find_map(offered));

        Resolved::new(value, stale)
    }

    /// Live memberships without pruning, default group first.
    pub fn resolve_memberships(
        &self,
        registry: &GroupRegistry,
        id: &UserId,
        now: Millis,
    ) -> Resolved<Vec<(String, Membership)>> {
        let (groups, stale) = self.contributing_groups(registry, id, now);
        let user = self.users.get(id);

        let value = groups
            .into_iter()
            .map(|g| {
                let membership = user
                    .and_then(|u| u.groups.get(&g.name).copied())
                    .unwrap_or(Membership::Permanent);
                (g.name.clone(), membership)
            })
            .collect();

        Resolved::new(value, stale)
    }

    /// Members of a group without pruning.
    pub fn resolve_members(
        &self,
        registry: &GroupRegistry,
        group: &str,
        now: Millis,
    ) -> Result<Resolved<Members>> {
        if !registry.contains(group) {
            return Err(PermsError::GroupNotFound(group.to_string()));
        }
        if group == DEFAULT_GROUP {
            return Ok(Resolved::new(Members::Everyone, Vec::new()));
        }

        let mut live = Vec::new();
        let mut stale = Vec::new();
        for (user, membership) in self.index.members(group) {
            if membership.is_live(now) {
                live.push((user, membership));
            } else {
                stale.push(StaleMembership {
                    user,
                    group: group.to_string(),
                });
            }
        }

        Ok(Resolved::new(Members::Listed(live), stale))
    }

    /// The default group followed by each live, registered membership.
    fn contributing_groups<'r>(
        &self,
        registry: &'r GroupRegistry,
        id: &UserId,
        now: Millis,
    ) -> (Vec<&'r Group>, Vec<StaleMembership>) {
        let mut groups: Vec<&'r Group> = registry.default_group().into_iter().collect();
        let mut stale = Vec::new();

        if let Some(user) = self.users.get(id) {
            for (name, membership) in &user.groups {
                if !membership.is_live(now) {
                    stale.push(StaleMembership {
                        user: *id,
                        group: name.clone(),
                    });
                    continue;
                }
                if name == DEFAULT_GROUP {
                    continue;
                }
                if let Some(group) = registry.get_group(name) {
                    groups.push(group);
                }
            }
        }

        (groups, stale)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pruning resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Effective permissions, pruning expired memberships found on the way.
    pub fn effective_permissions(
        &mut self,
        registry: &GroupRegistry,
        id: &UserId,
        inherit: bool,
        now: Millis,
    ) -> BTreeSet<String> {
        let resolved = self.resolve_permissions(registry, id, inherit, now);
        self.settle(resolved, now)
    }

    /// Effective metadata, pruning expired memberships found on the way.
    pub fn effective_metadata(
        &mut self,
        registry: &GroupRegistry,
        id: &UserId,
        inherit: bool,
        now: Millis,
    ) -> BTreeMap<String, String> {
        let resolved = self.resolve_metadata(registry, id, inherit, now);
        self.settle(resolved, now)
    }

    /// Whether the user holds every requested permission.
    pub fn has_permission<S: AsRef<str>>(
        &mut self,
        registry: &GroupRegistry,
        id: &UserId,
        requested: &[S],
        now: Millis,
        precedence: WildcardPrecedence,
    ) -> bool {
        let effective = self.effective_permissions(registry, id, true, now);
        matches_all(&effective, requested, precedence)
    }

    /// One effective metadata value.
    pub fn metadata_value(
        &mut self,
        registry: &GroupRegistry,
        id: &UserId,
        key: &str,
        now: Millis,
    ) -> Option<String> {
        self.effective_metadata(registry, id, true, now).remove(key)
    }

    /// A single-valued metadata key resolved by group priority.
    pub fn ranked_metadata(
        &mut self,
        registry: &GroupRegistry,
        id: &UserId,
        key: &str,
        now: Millis,
    ) -> Option<String> {
        let resolved = self.resolve_ranked_metadata(registry, id, key, now);
        self.settle(resolved, now)
    }

    /// Live memberships, default group first.
    pub fn memberships(
        &mut self,
        registry: &GroupRegistry,
        id: &UserId,
        now: Millis,
    ) -> Vec<(String, Membership)> {
        let resolved = self.resolve_memberships(registry, id, now);
        self.settle(resolved, now)
    }

    /// Members of a group, pruning expired ones.
    pub fn list_members(
        &mut self,
        registry: &GroupRegistry,
        group: &str,
        now: Millis,
    ) -> Result<Members> {
        let resolved = self.resolve_members(registry, group, now)?;
        Ok(self.settle(resolved, now))
    }

    fn settle<T>(&mut self, resolved: Resolved<T>, now: Millis) -> T {
        if resolved.has_stale() {
            self.prune(&resolved.stale, now);
        }
        resolved.value
    }
}
