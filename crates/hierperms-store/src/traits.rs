//! Store trait: the abstract interface for snapshot persistence.
//!
//! The engine never talks to a database directly. It hands whole snapshots
//! to a [`Store`] and asks for one back on startup.

use async_trait::async_trait;
use hierperms_core::Snapshot;

use crate::error::Result;

/// Async interface for persisting engine state.
///
/// Implementations store whole snapshots. For SQLite the work runs on the
/// blocking pool so the runtime is never stalled.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the last saved snapshot.
    ///
    /// Returns `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace everything stored with `snapshot`.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}
