//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. Nothing survives the store being dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use hierperms_core::Snapshot;

use crate::error::Result;
use crate::traits::Store;

/// In-memory store holding at most one snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RwLock<Option<Snapshot>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        }
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// A copy of the stored snapshot.
    pub fn current(&self) -> Option<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.current())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hierperms_core::GroupRecord;

    #[tokio::test]
    async fn test_memory_store_starts_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_save_replaces() {
        let store = MemoryStore::new();

        let mut first = Snapshot::new();
        first.groups.insert("vip".into(), GroupRecord::default());
        store.save(&first).await.unwrap();

        let second = Snapshot::new();
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(second));
        assert_eq!(store.save_count(), 2);
    }
}
