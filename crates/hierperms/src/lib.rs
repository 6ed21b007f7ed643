//! # hierperms
//!
//! A hierarchical group permission engine: named groups with single-parent
//! inheritance, users with direct grants and permanent or expiring
//! memberships, and effective permission and metadata resolution.
//!
//! ## Key Concepts
//!
//! - **Default group**: Always present, implicitly joined by every user.
//! - **Inheritance**: A group has everything its ancestors have. Broken or
//!   cyclic chains simply end early.
//! - **Tokens**: `*` grants everything; `-name` denies `name`.
//! - **Expiry**: A membership stops applying the moment it expires and is
//!   pruned on the next read that notices it.
//! - **Dirty**: The engine knows when it holds unflushed changes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hierperms::{Engine, EngineConfig, Membership, UserId};
//! use hierperms::store::SqliteStore;
//!
//! async fn example() -> hierperms::Result<()> {
//!     let store = SqliteStore::open("perms.db")?;
//!     let engine = Engine::new(EngineConfig::default());
//!     engine.load_from(&store).await?;
//!
//!     engine.create_group("vip", None, 5)?;
//!     engine.grant_group_permission("vip", "fly")?;
//!
//!     let user = UserId::random();
//!     engine.join_group(user, "vip", Membership::Permanent)?;
//!     assert!(engine.has_permission(&user, &["fly"]));
//!
//!     engine.flush_to(&store).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `hierperms::core` - Groups, users, the permission algebra, snapshots
//! - `hierperms::store` - Storage trait, SQLite and in-memory stores

pub mod engine;
pub mod error;

// Re-export component crates
pub use hierperms_core as core;
pub use hierperms_store as store;

// Re-export main types for convenience
pub use engine::{Engine, EngineConfig, PREFIX_KEY, SUFFIX_KEY};
pub use error::{EngineError, Result};

// Re-export commonly used core types
pub use hierperms_core::{
    Clock, Group, LoadReport, LoadWarning, Members, Membership, Millis, PermsError, Snapshot,
    SystemClock, User, UserId, WildcardPrecedence, DEFAULT_GROUP,
};
