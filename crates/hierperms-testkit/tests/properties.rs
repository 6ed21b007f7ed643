//! Property tests over generated hierarchies.

use proptest::prelude::*;

use hierperms_core::algebra::{matches_all, negate, WildcardPrecedence, WILDCARD};
use hierperms_core::{
    export_snapshot, load_snapshot, MembershipIndex, Snapshot, UserId, UserRecord,
};
use hierperms_testkit::generators::{
    permission_set, plain_token, snapshot_from_params, HierarchyParams,
};
use hierperms_testkit::FIXTURE_EPOCH;

fn user_ids(snapshot: &Snapshot) -> Vec<UserId> {
    snapshot
        .users
        .keys()
        .filter_map(|raw| raw.parse().ok())
        .collect()
}

proptest! {
    #[test]
    fn group_own_permissions_are_inherited_superset(params: HierarchyParams) {
        let loaded = load_snapshot(&snapshot_from_params(&params), FIXTURE_EPOCH);

        for group in loaded.registry.iter() {
            let own = loaded.registry.effective_permissions(group, false);
            let all = loaded.registry.effective_permissions(group, true);
            prop_assert!(own.is_subset(&all));
        }
    }

    #[test]
    fn chains_terminate_within_registry_size(params: HierarchyParams) {
        let loaded = load_snapshot(&snapshot_from_params(&params), FIXTURE_EPOCH);

        for group in loaded.registry.iter() {
            prop_assert!(loaded.registry.chain(group).len() <= loaded.registry.len());
        }
    }

    #[test]
    fn direct_tokens_always_effective(params: HierarchyParams) {
        let snapshot = snapshot_from_params(&params);
        let mut loaded = load_snapshot(&snapshot, FIXTURE_EPOCH);

        for id in user_ids(&snapshot) {
            let own = loaded
                .users
                .find_user(&id)
                .map(|u| u.permissions.clone())
                .unwrap_or_default();
            let all = loaded
                .users
                .effective_permissions(&loaded.registry, &id, true, FIXTURE_EPOCH);
            prop_assert!(own.is_subset(&all));
        }
    }

    #[test]
    fn empty_request_always_granted(params: HierarchyParams) {
        let snapshot = snapshot_from_params(&params);
        let mut loaded = load_snapshot(&snapshot, FIXTURE_EPOCH);
        let nothing: [&str; 0] = [];

        for id in user_ids(&snapshot) {
            prop_assert!(loaded.users.has_permission(
                &loaded.registry,
                &id,
                &nothing,
                FIXTURE_EPOCH,
                WildcardPrecedence::Compatible,
            ));
        }
    }

    #[test]
    fn single_token_semantics(effective in permission_set(8), token in plain_token()) {
        let granted = matches_all(&effective, &[&token], WildcardPrecedence::Compatible);
        let expected = effective.contains(WILDCARD)
            || (effective.contains(&token) && !effective.contains(&negate(&token)));
        prop_assert_eq!(granted, expected);

        let strict = matches_all(&effective, &[&token], WildcardPrecedence::NegationFirst);
        let expected = !effective.contains(&negate(&token))
            && (effective.contains(WILDCARD) || effective.contains(&token));
        prop_assert_eq!(strict, expected);
    }

    #[test]
    fn load_keeps_index_consistent(params: HierarchyParams) {
        let loaded = load_snapshot(&snapshot_from_params(&params), FIXTURE_EPOCH);
        prop_assert_eq!(
            loaded.users.index(),
            &MembershipIndex::rebuild(loaded.users.users())
        );
    }

    #[test]
    fn loaded_memberships_are_live(params: HierarchyParams) {
        let snapshot = snapshot_from_params(&params);
        let mut loaded = load_snapshot(&snapshot, FIXTURE_EPOCH);

        for id in user_ids(&snapshot) {
            for (_, membership) in loaded.users.memberships(&loaded.registry, &id, FIXTURE_EPOCH) {
                prop_assert!(membership.is_live(FIXTURE_EPOCH));
            }
        }
    }

    #[test]
    fn export_then_load_resolves_identically(params: HierarchyParams) {
        let snapshot = snapshot_from_params(&params);
        let mut first = load_snapshot(&snapshot, FIXTURE_EPOCH);
        let exported = export_snapshot(&first.registry, &first.users, FIXTURE_EPOCH);
        let mut second = load_snapshot(&exported, FIXTURE_EPOCH);

        for id in user_ids(&snapshot) {
            prop_assert_eq!(
                first.users.effective_permissions(&first.registry, &id, true, FIXTURE_EPOCH),
                second.users.effective_permissions(&second.registry, &id, true, FIXTURE_EPOCH)
            );
            prop_assert_eq!(
                first.users.effective_metadata(&first.registry, &id, true, FIXTURE_EPOCH),
                second.users.effective_metadata(&second.registry, &id, true, FIXTURE_EPOCH)
            );
            prop_assert_eq!(
                first.users.ranked_metadata(&first.registry, &id, "prefix", FIXTURE_EPOCH),
                second.users.ranked_metadata(&second.registry, &id, "prefix", FIXTURE_EPOCH)
            );
        }
        for group in first.registry.iter() {
            let other = second.registry.get_group(&group.name);
            prop_assert!(other.is_some());
            if let Some(other) = other {
                prop_assert_eq!(
                    first.registry.effective_permissions(group, true),
                    second.registry.effective_permissions(other, true)
                );
            }
        }
        prop_assert_eq!(
            export_snapshot(&second.registry, &second.users, FIXTURE_EPOCH),
            exported
        );
    }

    #[test]
    fn snapshot_json_and_cbor_agree(params: HierarchyParams) {
        let snapshot = snapshot_from_params(&params);
        let json = Snapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        let cbor = Snapshot::from_cbor(&snapshot.to_cbor().unwrap()).unwrap();
        prop_assert_eq!(&json, &snapshot);
        prop_assert_eq!(&cbor, &snapshot);
    }
}

#[test]
fn expired_membership_in_snapshot_is_dropped() {
    let mut snapshot = Snapshot::new();
    snapshot.groups.insert("default".into(), Default::default());
    snapshot.groups.insert("vip".into(), Default::default());
    let mut record = UserRecord::default();
    record.groups.insert("vip".into(), Some(FIXTURE_EPOCH));
    record.permissions.insert("x".into());
    snapshot.users.insert(UserId::from_bytes([7; 16]).to_string(), record);

    let loaded = load_snapshot(&snapshot, FIXTURE_EPOCH);
    assert_eq!(loaded.report.dropped_expired, 1);
    assert_eq!(loaded.users.index().member_count("vip"), 0);
}
