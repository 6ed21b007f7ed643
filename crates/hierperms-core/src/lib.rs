//! # hierperms core
//!
//! Pure primitives for hierarchical permissions: groups, users, memberships
//! and the permission algebra that composes them.
//!
//! This crate contains no I/O and no locking. Time is passed in explicitly
//! as epoch milliseconds so every computation is deterministic.
//!
//! ## Key Types
//!
//! - [`Group`] - Named bundle of permissions and metadata with one parent
//! - [`GroupRegistry`] - All groups, plus inheritance chain resolution
//! - [`User`] - Direct grants and explicit memberships of one identity
//! - [`UserStore`] - All users, plus the reverse [`MembershipIndex`]
//! - [`Membership`] - Permanent or expiring membership
//! - [`Snapshot`] - Plain-data form of the whole state
//!
//! ## Permission algebra
//!
//! Tokens are opaque strings. `*` grants everything and a leading `-`
//! negates a token. See [`algebra`] for the exact matching rules.

pub mod algebra;
pub mod error;
pub mod group;
pub mod index;
pub mod loader;
pub mod membership;
pub mod registry;
pub mod snapshot;
pub mod types;
pub mod user;

pub use algebra::{matches_all, merge, merge_metadata, WildcardPrecedence, NEGATION_PREFIX, WILDCARD};
pub use error::{PermsError, Result};
pub use group::Group;
pub use index::MembershipIndex;
pub use loader::{export_snapshot, load_snapshot, LoadReport, LoadWarning, Loaded};
pub use membership::{Membership, MembershipState};
pub use registry::{valid_group_name, ChainAnomaly, GroupRegistry};
pub use snapshot::{GroupRecord, Snapshot, UserRecord};
pub use types::{now_millis, Clock, Millis, SystemClock, UserId, DEFAULT_GROUP};
pub use user::{Members, Resolved, StaleMembership, User, UserStore};
