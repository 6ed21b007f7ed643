//! Proptest generators for property-based testing.
//!
//! Hierarchies are generated as index-based parameters first and turned
//! into a [`Snapshot`] afterwards, so shrinking keeps the shape readable.
//! Parents are drawn from siblings, the default group, a missing name and
//! the group itself, which yields cycles, dangling parents and self-parents
//! as a matter of course.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use hierperms_core::algebra::{negate, WILDCARD};
use hierperms_core::{GroupRecord, Millis, Snapshot, UserId, UserRecord, DEFAULT_GROUP};

use crate::fixtures::FIXTURE_EPOCH;

/// Name used for parents that are never defined.
pub const MISSING_PARENT: &str = "missing";

/// Generate a permission token: plain, negated, or the wildcard.
pub fn token() -> impl Strategy<Value = String> {
    prop_oneof![
        6 => "[a-e]{1,2}",
        2 => "[a-e]{1,2}".prop_map(|t| negate(&t)),
        1 => Just(WILDCARD.to_string()),
    ]
}

/// Generate a plain, non-negated, non-wildcard token.
pub fn plain_token() -> impl Strategy<Value = String> {
    "[a-e]{1,2}".prop_map(String::from)
}

/// Generate a set of up to `max` tokens.
pub fn permission_set(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(token(), 0..=max)
}

/// Generate metadata over a few shared keys, empty values included.
pub fn metadata(max: usize) -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        prop::sample::select(vec!["prefix", "suffix", "color"]).prop_map(String::from),
        "[a-z]{0,3}",
        0..=max,
    )
}

/// Generate a user id.
pub fn user_id() -> impl Strategy<Value = UserId> {
    any::<[u8; 16]>().prop_map(UserId::from_bytes)
}

/// Where a generated group points its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentChoice {
    /// No parent recorded, meaning the default group.
    Default,
    /// Another generated group, by index. May be the group itself.
    Sibling(usize),
    /// A name no group has.
    Missing,
    /// Explicitly the group's own name.
    Itself,
}

fn parent_choice(groups: usize) -> impl Strategy<Value = ParentChoice> {
    prop_oneof![
        3 => Just(ParentChoice::Default),
        4 => (0..groups).prop_map(ParentChoice::Sibling),
        1 => Just(ParentChoice::Missing),
        1 => Just(ParentChoice::Itself),
    ]
}

/// Parameters for one generated group, named `g{index}`.
#[derive(Debug, Clone)]
pub struct GroupParams {
    pub parent: ParentChoice,
    pub permissions: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub priority: i32,
}

/// Parameters for one generated user.
#[derive(Debug, Clone)]
pub struct UserParams {
    pub id: UserId,
    pub permissions: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    /// Group index and expiration offset from [`FIXTURE_EPOCH`].
    pub memberships: Vec<(usize, Option<Millis>)>,
}

/// Parameters for a whole hierarchy with users.
#[derive(Debug, Clone)]
pub struct HierarchyParams {
    pub groups: Vec<GroupParams>,
    pub users: Vec<UserParams>,
}

impl HierarchyParams {
    /// Name of the generated group at `index`.
    pub fn group_name(index: usize) -> String {
        format!("g{}", index)
    }
}

impl Arbitrary for HierarchyParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (1usize..8)
            .prop_flat_map(|n| {
                let group = (parent_choice(n), permission_set(4), metadata(2), -5i32..10).prop_map(
                    |(parent, permissions, metadata, priority)| GroupParams {
                        parent,
                        permissions,
                        metadata,
                        priority,
                    },
                );
                let user = (
                    user_id(),
                    permission_set(3),
                    metadata(2),
                    prop::collection::vec((0..n, prop::option::of(-10_000i64..10_000)), 0..4),
                )
                    .prop_map(|(id, permissions, metadata, memberships)| UserParams {
                        id,
                        permissions,
                        metadata,
                        memberships,
                    });
                (
                    prop::collection::vec(group, n),
                    prop::collection::vec(user, 0..6),
                )
            })
            .prop_map(|(groups, users)| HierarchyParams { groups, users })
            .boxed()
    }
}

/// Build a snapshot from parameters.
///
/// The default group is always included with a `base` permission so every
/// user inherits something.
pub fn snapshot_from_params(params: &HierarchyParams) -> Snapshot {
    let mut snapshot = Snapshot::new();
    snapshot.groups.insert(
        DEFAULT_GROUP.to_string(),
        GroupRecord {
            permissions: ["base".to_string()].into(),
            ..Default::default()
        },
    );

    for (index, group) in params.groups.iter().enumerate() {
        let name = HierarchyParams::group_name(index);
        let parent = match &group.parent {
            ParentChoice::Default => None,
            ParentChoice::Sibling(i) => Some(HierarchyParams::group_name(*i)),
            ParentChoice::Missing => Some(MISSING_PARENT.to_string()),
            ParentChoice::Itself => Some(name.clone()),
        };
        snapshot.groups.insert(
            name,
            GroupRecord {
                parent,
                permissions: group.permissions.clone(),
                metadata: group.metadata.clone(),
                priority: group.priority,
            },
        );
    }

    for user in &params.users {
        let record = UserRecord {
            permissions: user.permissions.clone(),
            metadata: user.metadata.clone(),
            groups: user
                .memberships
                .iter()
                .map(|(i, offset)| {
                    (
                        HierarchyParams::group_name(*i),
                        offset.map(|o| FIXTURE_EPOCH + o),
                    )
                })
                .collect(),
        };
        snapshot.users.insert(user.id.to_string(), record);
    }

    snapshot
}
