//! The Engine: unified API for hierarchical permissions.
//!
//! The Engine owns the group registry and user store behind one lock, reads
//! time from its clock, and tracks whether anything changed since the last
//! flush to a [`Store`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hierperms_core::{
    export_snapshot, load_snapshot, matches_all, Clock, Group, GroupRegistry, LoadReport, Members,
    Membership, Millis, PermsError, Resolved, Snapshot, SystemClock, User, UserId, UserStore,
    WildcardPrecedence, DEFAULT_GROUP,
};
use hierperms_store::Store;

use crate::error::Result;

/// Metadata key holding a user's chat prefix.
pub const PREFIX_KEY: &str = "prefix";

/// Metadata key holding a user's chat suffix.
pub const SUFFIX_KEY: &str = "suffix";

/// Configuration for the Engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How `*` interacts with negated tokens in permission checks.
    pub wildcard_precedence: WildcardPrecedence,
    /// Whether to warn when a parent change leaves a group's chain broken.
    pub report_anomalies: bool,
    /// Whether reads prune the expired memberships they notice.
    pub prune_on_read: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wildcard_precedence: WildcardPrecedence::Compatible,
            report_anomalies: true,
            prune_on_read: true,
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    groups: GroupRegistry,
    users: UserStore,
}

/// The main Engine struct.
///
/// Provides a unified API for:
/// - Managing groups and their hierarchy
/// - Granting permissions and metadata to groups and users
/// - Timed and permanent memberships
/// - Resolving effective permissions and metadata
/// - Loading from and flushing to a store
///
/// Every method is atomic with respect to the others. Mutations that report
/// a change mark the engine dirty.
pub struct Engine {
    state: RwLock<EngineState>,
    dirty: AtomicBool,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Create an engine holding only the default group, on the system clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine that reads time from `clock`.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(EngineState::default()),
            dirty: AtomicBool::new(false),
            clock,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current time according to the engine's clock.
    pub fn now(&self) -> Millis {
        self.clock.now_millis()
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(|poisoned| {
            tracing::error!("engine state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(|poisoned| {
            tracing::error!("engine state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn mark(&self, changed: bool) -> bool {
        if changed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        changed
    }

    /// Compute under the read lock, then prune anything found expired.
    fn resolve<T>(&self, f: impl FnOnce(&EngineState, Millis) -> Resolved<T>) -> T {
        let now = self.now();
        let resolved = f(&self.read(), now);
        self.settle(resolved, now)
    }

    fn settle<T>(&self, resolved: Resolved<T>, now: Millis) -> T {
        if resolved.has_stale() && self.config.prune_on_read {
            let pruned = self.write().users.prune(&resolved.stale, now);
            self.mark(pruned > 0);
        }
        resolved.value
    }

    fn update_group(&self, name: &str, f: impl FnOnce(&mut Group) -> bool) -> Result<bool> {
        let mut state = self.write();
        let group = state
            .groups
            .get_group_mut(name)
            .ok_or_else(|| PermsError::GroupNotFound(name.to_string()))?;
        Ok(self.mark(f(group)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────────

    /// A copy of a group.
    pub fn group(&self, name: &str) -> Option<Group> {
        self.read().groups.get_group(name).cloned()
    }

    /// All group names, sorted.
    pub fn group_names(&self) -> Vec<String> {
        self.read().groups.names()
    }

    /// Create an empty group. `None` as parent means the default group.
    pub fn create_group(&self, name: &str, parent: Option<&str>, priority: i32) -> Result<()> {
        let parent = parent.unwrap_or(DEFAULT_GROUP);
        self.write().groups.create_group(name, parent, priority)?;
        self.mark(true);
        tracing::info!("created group '{}' under '{}'", name, parent);
        Ok(())
    }

    /// Delete a group and every membership in it.
    ///
    /// Returns whether a group was deleted. The default group is protected.
    pub fn delete_group(&self, name: &str) -> Result<bool> {
        let mut state = self.write();
        if !state.groups.delete_group(name)? {
            return Ok(false);
        }
        let removed = state.users.purge_group(name);
        tracing::info!("deleted group '{}' ({} memberships removed)", name, removed);
        Ok(self.mark(true))
    }

    /// Grant a permission token to a group.
    pub fn grant_group_permission(&self, name: &str, token: &str) -> Result<bool> {
        self.update_group(name, |group| group.grant(token))
    }

    /// Revoke a permission token from a group.
    pub fn revoke_group_permission(&self, name: &str, token: &str) -> Result<bool> {
        self.update_group(name, |group| group.revoke(token))
    }

    /// Set a metadata value on a group.
    pub fn set_group_metadata(&self, name: &str, key: &str, value: &str) -> Result<bool> {
        self.update_group(name, |group| group.set_metadata(key, value))
    }

    /// Remove a metadata value from a group.
    pub fn unset_group_metadata(&self, name: &str, key: &str) -> Result<bool> {
        self.update_group(name, |group| group.unset_metadata(key))
    }

    /// Re-parent a group.
    ///
    /// Any parent name is accepted. With `report_anomalies` set, a parent
    /// that is missing or closes a cycle is logged.
    pub fn set_group_parent(&self, name: &str, parent: &str) -> Result<bool> {
        let mut state = self.write();
        let changed = state.groups.set_parent(name, parent)?;
        if changed && self.config.report_anomalies {
            for anomaly in state.groups.anomalies() {
                if anomaly.group() == name {
                    tracing::warn!("group '{}' now has a broken chain: {:?}", name, anomaly);
                }
            }
        }
        Ok(self.mark(changed))
    }

    /// Change a group's priority.
    pub fn set_group_priority(&self, name: &str, priority: i32) -> Result<bool> {
        Ok(self.mark(self.write().groups.set_priority(name, priority)?))
    }

    /// Permissions of a group, optionally with everything it inherits.
    pub fn group_permissions(&self, name: &str, inherit: bool) -> Result<BTreeSet<String>> {
        let state = self.read();
        let group = state
            .groups
            .get_group(name)
            .ok_or_else(|| PermsError::GroupNotFound(name.to_string()))?;
        Ok(state.groups.effective_permissions(group, inherit))
    }

    /// Metadata of a group, optionally with everything it inherits.
    pub fn group_metadata(&self, name: &str, inherit: bool) -> Result<BTreeMap<String, String>> {
        let state = self.read();
        let group = state
            .groups
            .get_group(name)
            .ok_or_else(|| PermsError::GroupNotFound(name.to_string()))?;
        Ok(state.groups.effective_metadata(group, inherit))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users: resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// A copy of a user's record. Unknown users come back empty.
    pub fn user(&self, id: &UserId) -> User {
        self.read()
            .users
            .find_user(id)
            .cloned()
            .unwrap_or_else(|| User::new(*id))
    }

    /// Whether the user holds every requested permission.
    ///
    /// An empty request is always granted.
    pub fn has_permission<S: AsRef<str>>(&self, id: &UserId, requested: &[S]) -> bool {
        let effective = self.effective_permissions(id, true);
        matches_all(&effective, requested, self.config.wildcard_precedence)
    }

    /// The user's permissions, optionally with everything inherited.
    pub fn effective_permissions(&self, id: &UserId, inherit: bool) -> BTreeSet<String> {
        self.resolve(|state, now| state.users.resolve_permissions(&state.groups, id, inherit, now))
    }

    /// The user's metadata, optionally with everything inherited.
    pub fn effective_metadata(&self, id: &UserId, inherit: bool) -> BTreeMap<String, String> {
        self.resolve(|state, now| state.users.resolve_metadata(&state.groups, id, inherit, now))
    }

    /// One effective metadata value.
    pub fn metadata_value(&self, id: &UserId, key: &str) -> Option<String> {
        self.effective_metadata(id, true).remove(key)
    }

    /// A single-valued metadata key picked by group priority.
    pub fn ranked_metadata(&self, id: &UserId, key: &str) -> Option<String> {
        self.resolve(|state, now| {
            state
                .users
                .resolve_ranked_metadata(&state.groups, id, key, now)
        })
    }

    /// The user's chat prefix.
    pub fn prefix(&self, id: &UserId) -> Option<String> {
        self.ranked_metadata(id, PREFIX_KEY)
    }

    /// The user's chat suffix.
    pub fn suffix(&self, id: &UserId) -> Option<String> {
        self.ranked_metadata(id, SUFFIX_KEY)
    }

    /// Live memberships, default group first.
    pub fn memberships(&self, id: &UserId) -> Vec<(String, Membership)> {
        self.resolve(|state, now| state.users.resolve_memberships(&state.groups, id, now))
    }

    /// Members of a group.
    pub fn list_members(&self, group: &str) -> Result<Members> {
        let now = self.now();
        let resolved = {
            let state = self.read();
            state.users.resolve_members(&state.groups, group, now)?
        };
        Ok(self.settle(resolved, now))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users: mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant a permission token directly to a user.
    pub fn grant_permission(&self, id: UserId, token: &str) -> bool {
        self.mark(self.write().users.grant_permission(id, token))
    }

    /// Revoke a direct permission token.
    pub fn revoke_permission(&self, id: &UserId, token: &str) -> bool {
        self.mark(self.write().users.revoke_permission(id, token))
    }

    /// Set a direct metadata value.
    pub fn set_metadata(&self, id: UserId, key: &str, value: &str) -> bool {
        self.mark(self.write().users.set_metadata(id, key, value))
    }

    /// Remove a direct metadata value.
    pub fn unset_metadata(&self, id: &UserId, key: &str) -> bool {
        self.mark(self.write().users.unset_metadata(id, key))
    }

    /// Add a user to a group.
    ///
    /// Returns `false` when the user is already a live member, the group is
    /// the default group, or the membership has already expired.
    pub fn join_group(&self, id: UserId, group: &str, membership: Membership) -> Result<bool> {
        let now = self.now();
        let mut state = self.write();
        let EngineState { groups, users } = &mut *state;
        let joined = users.join_group(groups, id, group, membership, now)?;
        if joined {
            tracing::debug!("{} joined '{}' ({:?})", id, group, membership);
        }
        Ok(self.mark(joined))
    }

    /// Remove a user from a group.
    pub fn leave_group(&self, id: &UserId, group: &str) -> bool {
        self.mark(self.write().users.leave_group(id, group))
    }

    /// Forget a user entirely.
    pub fn remove_user(&self, id: &UserId) -> bool {
        self.mark(self.write().users.remove_user(id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the whole state with a snapshot.
    ///
    /// Problems in the snapshot are reported, never fatal. The engine is
    /// dirty afterwards only if loading had to repair something.
    pub fn load(&self, snapshot: &Snapshot) -> LoadReport {
        let loaded = load_snapshot(snapshot, self.now());
        {
            let mut state = self.write();
            state.groups = loaded.registry;
            state.users = loaded.users;
        }
        self.dirty.store(loaded.report.repaired(), Ordering::SeqCst);
        loaded.report
    }

    /// Capture the whole state. Expired memberships are left out.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.read();
        export_snapshot(&state.groups, &state.users, self.now())
    }

    /// Whether there are changes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Clear the dirty flag, returning its previous value.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    /// Load state from a store.
    ///
    /// Returns `None` and leaves the engine untouched when the store holds
    /// nothing yet.
    pub async fn load_from<S: Store + ?Sized>(&self, store: &S) -> Result<Option<LoadReport>> {
        match store.load().await? {
            Some(snapshot) => Ok(Some(self.load(&snapshot))),
            None => {
                tracing::info!("store is empty, keeping current state");
                Ok(None)
            }
        }
    }

    /// Save state to a store if anything changed.
    ///
    /// Returns whether a save happened. On failure the engine stays dirty.
    pub async fn flush_to<S: Store + ?Sized>(&self, store: &S) -> Result<bool> {
        if !self.take_dirty() {
            return Ok(false);
        }

        let snapshot = self.snapshot();
        match store.save(&snapshot).await {
            Ok(()) => {
                tracing::info!(
                    "flushed {} groups and {} users",
                    snapshot.groups.len(),
                    snapshot.users.len()
                );
                Ok(true)
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                tracing::error!("flush failed: {}", e);
                Err(e.into())
            }
        }
    }
}
