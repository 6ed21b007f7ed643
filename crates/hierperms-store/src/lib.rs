//! # hierperms store
//!
//! Persistence for hierperms state. The engine hands whole [`Snapshot`]s to
//! a [`Store`] and reads one back on startup; how they are kept is up to
//! the backend.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait every backend implements
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hierperms_store::{SqliteStore, Store};
//!
//! async fn example() -> hierperms_store::Result<()> {
//!     let store = SqliteStore::open("perms.db")?;
//!     if let Some(snapshot) = store.load().await? {
//!         println!("{} groups stored", snapshot.groups.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`Snapshot`]: hierperms_core::Snapshot

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::Store;
