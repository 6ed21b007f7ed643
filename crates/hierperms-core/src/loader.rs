//! Turning snapshots into live state and back.
//!
//! Loading is lenient: a bad entry is reported and skipped, and the rest of
//! the snapshot still loads. Nothing in a snapshot can make loading fail.

use std::fmt;

use crate::group::Group;
use crate::membership::Membership;
use crate::registry::{valid_group_name, ChainAnomaly, GroupRegistry};
use crate::snapshot::{GroupRecord, Snapshot, UserRecord};
use crate::types::{Millis, UserId, DEFAULT_GROUP};
use crate::user::{User, UserStore};

/// A problem found while loading a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// The snapshot defines no groups at all.
    NoGroups,
    /// The default group was missing and has been created empty.
    MissingDefaultGroup,
    /// A group with an empty name was skipped.
    InvalidGroupName,
    /// A group names a parent that does not exist. The group is kept.
    UnknownParent { group: String, parent: String },
    /// A group names itself as parent and is treated as a root.
    SelfParent { group: String },
    /// A group's ancestry loops back to itself.
    CyclicParent { group: String },
    /// A user entry whose id could not be parsed was skipped.
    InvalidUserId { raw: String },
    /// A membership in an undefined group was skipped.
    UnknownGroup { user: UserId, group: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::NoGroups => write!(f, "there are no groups to load"),
            LoadWarning::MissingDefaultGroup => {
                write!(f, "default group is missing, created an empty one")
            }
            LoadWarning::InvalidGroupName => write!(f, "group with a blank name ignored"),
            LoadWarning::UnknownParent { group, parent } => {
                write!(f, "group '{}' has undefined parent '{}'", group, parent)
            }
            LoadWarning::SelfParent { group } => {
                write!(f, "group '{}' cannot be a child of itself", group)
            }
            LoadWarning::CyclicParent { group } => {
                write!(f, "group '{}' inherits from itself through its parents", group)
            }
            LoadWarning::InvalidUserId { raw } => {
                write!(f, "user entry '{}' is not a valid id, ignored", raw)
            }
            LoadWarning::UnknownGroup { user, group } => write!(
                f,
                "user '{}' is a member of an unknown group '{}', ignored",
                user, group
            ),
        }
    }
}

/// Outcome of a load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Every problem found, in the order found.
    pub warnings: Vec<LoadWarning>,

    /// Groups loaded, the default group included.
    pub groups: usize,

    /// User records loaded.
    pub users: usize,

    /// Memberships dropped because they had already expired.
    pub dropped_expired: usize,
}

impl LoadReport {
    /// Whether the loaded state differs from the snapshot it came from.
    ///
    /// True when the default group had to be created or expired memberships
    /// were dropped, meaning a flush would write something new.
    pub fn repaired(&self) -> bool {
        self.dropped_expired > 0 || self.warnings.contains(&LoadWarning::MissingDefaultGroup)
    }
}

/// Live state built from a snapshot.
#[derive(Debug)]
pub struct Loaded {
    pub registry: GroupRegistry,
    pub users: UserStore,
    pub report: LoadReport,
}

/// Build live state from a snapshot.
pub fn load_snapshot(snapshot: &Snapshot, now: Millis) -> Loaded {
    let mut report = LoadReport::default();
    let registry = load_groups(snapshot, &mut report);
    let users = load_users(snapshot, &registry, now, &mut report);

    report.groups = registry.len();
    report.users = users.len();

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::info!(
        "loaded {} groups and {} users ({} warnings)",
        report.groups,
        report.users,
        report.warnings.len()
    );

    Loaded {
        registry,
        users,
        report,
    }
}

fn load_groups(snapshot: &Snapshot, report: &mut LoadReport) -> GroupRegistry {
    let mut registry = GroupRegistry::new();

    if snapshot.groups.is_empty() {
        report.warnings.push(LoadWarning::NoGroups);
    }
    if !snapshot.groups.contains_key(DEFAULT_GROUP) {
        report.warnings.push(LoadWarning::MissingDefaultGroup);
    }

    for (name, record) in &snapshot.groups {
        if !valid_group_name(name) {
            report.warnings.push(LoadWarning::InvalidGroupName);
            continue;
        }
        registry.insert(group_from_record(name, record));
    }

    for anomaly in registry.anomalies() {
        report.warnings.push(match anomaly {
            ChainAnomaly::DanglingParent { group, parent } => {
                LoadWarning::UnknownParent { group, parent }
            }
            ChainAnomaly::SelfParent { group } => LoadWarning::SelfParent { group },
            ChainAnomaly::Cycle { group } => LoadWarning::CyclicParent { group },
        });
    }

    registry
}

fn group_from_record(name: &str, record: &GroupRecord) -> Group {
    let parent = if name == DEFAULT_GROUP {
        if let Some(parent) = record.parent.as_deref().filter(|p| *p != DEFAULT_GROUP) {
            tracing::warn!("default group cannot have parent '{}', ignoring it", parent);
        }
        DEFAULT_GROUP.to_string()
    } else {
        record
            .parent
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUP.to_string())
    };

    Group {
        name: name.to_string(),
        parent,
        permissions: record.permissions.clone(),
        metadata: record.metadata.clone(),
        priority: record.priority,
    }
}

fn load_users(
    snapshot: &Snapshot,
    registry: &GroupRegistry,
    now: Millis,
    report: &mut LoadReport,
) -> UserStore {
    let mut users = UserStore::new();

    for (raw, record) in &snapshot.users {
        let Ok(id) = raw.parse::<UserId>() else {
            report.warnings.push(LoadWarning::InvalidUserId { raw: raw.clone() });
            continue;
        };

        let mut user = User::new(id);
        user.permissions = record.permissions.clone();
        user.metadata = record.metadata.clone();

        for (group, expires_at) in &record.groups {
            if !registry.contains(group) {
                report.warnings.push(LoadWarning::UnknownGroup {
                    user: id,
                    group: group.clone(),
                });
                continue;
            }
            if group == DEFAULT_GROUP {
                continue;
            }
            let membership = Membership::from_expiration(*expires_at);
            if !membership.is_live(now) {
                tracing::debug!("dropping expired membership of {} in '{}'", id, group);
                report.dropped_expired += 1;
                continue;
            }
            user.groups.insert(group.clone(), membership);
        }

        if !user.is_empty() {
            users.insert_user(user);
        }
    }

    users
}

/// Capture live state as a snapshot.
///
/// Expired memberships and users without any data are left out.
pub fn export_snapshot(registry: &GroupRegistry, users: &UserStore, now: Millis) -> Snapshot {
    let mut snapshot = Snapshot::new();

    for group in registry.iter() {
        let parent = if group.is_default() {
            None
        } else {
            Some(group.parent.clone())
        };
        snapshot.groups.insert(
            group.name.clone(),
            GroupRecord {
                parent,
                permissions: group.permissions.clone(),
                metadata: group.metadata.clone(),
                priority: group.priority,
            },
        );
    }

    for user in users.users() {
        let record = UserRecord {
            permissions: user.permissions.clone(),
            metadata: user.metadata.clone(),
            groups: user
                .live_groups(now)
                .map(|(name, m)| (name.to_string(), m.expiration()))
                .collect(),
        };
        if record.permissions.is_empty() && record.metadata.is_empty() && record.groups.is_empty()
        {
            continue;
        }
        snapshot.users.insert(user.id.to_string(), record);
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::WildcardPrecedence;

    const NOW: Millis = 1_700_000_000_000;
    const ALICE: &str = "00000000-0000-0000-0000-0000000000a1";

    fn group(parent: Option<&str>, permissions: &[&str]) -> GroupRecord {
        GroupRecord {
            parent: parent.map(String::from),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_snapshot_creates_default_group() {
        let loaded = load_snapshot(&Snapshot::new(), NOW);

        assert!(loaded.registry.default_group().is_some());
        assert_eq!(
            loaded.report.warnings,
            vec![LoadWarning::NoGroups, LoadWarning::MissingDefaultGroup]
        );
        assert!(loaded.report.repaired());
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let mut snapshot = Snapshot::new();
        snapshot.groups.insert(DEFAULT_GROUP.into(), group(None, &["chat"]));
        snapshot.groups.insert("".into(), group(None, &[]));
        snapshot.groups.insert("lost".into(), group(Some("nowhere"), &["x"]));
        snapshot.groups.insert("a".into(), group(Some("b"), &[]));
        snapshot.groups.insert("b".into(), group(Some("a"), &[]));

        let mut alice = UserRecord::default();
        alice.groups.insert("lost".into(), None);
        alice.groups.insert("ghost".into(), None);
        snapshot.users.insert(ALICE.into(), alice);
        snapshot.users.insert("not-an-id".into(), UserRecord::default());

        let loaded = load_snapshot(&snapshot, NOW);
        let id: UserId = ALICE.parse().unwrap();

        assert_eq!(
            loaded.report.warnings,
            vec![
                LoadWarning::InvalidGroupName,
                LoadWarning::CyclicParent { group: "a".into() },
                LoadWarning::CyclicParent { group: "b".into() },
                LoadWarning::UnknownParent {
                    group: "lost".into(),
                    parent: "nowhere".into()
                },
                LoadWarning::UnknownGroup {
                    user: id,
                    group: "ghost".into()
                },
                LoadWarning::InvalidUserId {
                    raw: "not-an-id".into()
                },
            ]
        );
        assert_eq!(loaded.report.groups, 4);
        assert_eq!(loaded.report.users, 1);
        assert!(!loaded.report.repaired());

        let user = loaded.users.find_user(&id).unwrap();
        assert_eq!(user.groups.len(), 1);
        assert_eq!(loaded.users.index().member_count("lost"), 1);
    }

    #[test]
    fn test_expired_memberships_dropped_at_load() {
        let mut snapshot = Snapshot::new();
        snapshot.groups.insert(DEFAULT_GROUP.into(), group(None, &[]));
        snapshot.groups.insert("vip".into(), group(None, &["fly"]));

        let mut alice = UserRecord::default();
        alice.groups.insert("vip".into(), Some(NOW - 1000));
        snapshot.users.insert(ALICE.into(), alice);

        let loaded = load_snapshot(&snapshot, NOW);
        assert_eq!(loaded.report.dropped_expired, 1);
        assert!(loaded.report.repaired());
        // Nothing else left on the record, so it is not kept
        assert_eq!(loaded.users.len(), 0);
    }

    #[test]
    fn test_default_group_parent_is_forced_to_root() {
        let mut snapshot = Snapshot::new();
        snapshot.groups.insert(DEFAULT_GROUP.into(), group(Some("vip"), &[]));
        snapshot.groups.insert("vip".into(), group(None, &[]));

        let loaded = load_snapshot(&snapshot, NOW);
        let default = loaded.registry.default_group().unwrap();
        assert_eq!(default.parent_name(), None);
        assert!(loaded.report.warnings.is_empty());
    }

    #[test]
    fn test_export_then_load_resolves_identically() {
        let mut snapshot = Snapshot::new();
        snapshot.groups.insert(DEFAULT_GROUP.into(), group(None, &["chat"]));
        snapshot.groups.insert("vip".into(), group(None, &["fly"]));
        snapshot.groups.insert("admin".into(), group(Some("vip"), &["*"]));

        let mut alice = UserRecord::default();
        alice.groups.insert("admin".into(), Some(NOW + 60_000));
        alice.permissions.insert("-kick".into());
        alice.metadata.insert("prefix".into(), "[a]".into());
        snapshot.users.insert(ALICE.into(), alice);

        let mut first = load_snapshot(&snapshot, NOW);
        let exported = export_snapshot(&first.registry, &first.users, NOW);
        let mut second = load_snapshot(&exported, NOW);
        let id: UserId = ALICE.parse().unwrap();

        assert_eq!(
            first.users.effective_permissions(&first.registry, &id, true, NOW),
            second.users.effective_permissions(&second.registry, &id, true, NOW)
        );
        assert_eq!(
            first.users.effective_metadata(&first.registry, &id, true, NOW),
            second.users.effective_metadata(&second.registry, &id, true, NOW)
        );
        assert!(second.users.has_permission(
            &second.registry,
            &id,
            &["fly"],
            NOW,
            WildcardPrecedence::Compatible
        ));
        assert_eq!(export_snapshot(&second.registry, &second.users, NOW), exported);
    }

    #[test]
    fn test_export_filters_expired() {
        let mut registry = GroupRegistry::new();
        registry.create_group("vip", DEFAULT_GROUP, 0).unwrap();
        let mut users = UserStore::new();
        let id: UserId = ALICE.parse().unwrap();
        users
            .join_group(&registry, id, "vip", Membership::Until(NOW + 1), NOW)
            .unwrap();

        let snapshot = export_snapshot(&registry, &users, NOW + 1);
        assert!(snapshot.users.is_empty());
        assert_eq!(snapshot.groups[DEFAULT_GROUP].parent, None);
        assert_eq!(snapshot.groups["vip"].parent.as_deref(), Some(DEFAULT_GROUP));
    }
}
