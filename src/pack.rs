//! Delta payload store
//!
//! A pack maps `(item uuid, delta uuid)` to a payload tree. It is shared
//! by every revision item of a history, so implementations take `&self`
//! and lock internally. A missing key is a normal condition: the payload
//! may not have been synced yet.
//!
//! Author: Moroya Sakamoto

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::tree::DataTree;

/// Composite pack key; delta ids are namespaced by item id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackKey {
    pub item: Uuid,
    pub delta: Uuid,
}

impl PackKey {
    pub fn new(item: Uuid, delta: Uuid) -> Self {
        Self { item, delta }
    }
}

/// Shared handle to a pack
pub type PackPtr = Arc<dyn Pack>;

/// Backing store for delta payloads
pub trait Pack: Send + Sync {
    /// Upsert a whole payload. Last write wins.
    fn set_delta_data_for(&self, item: Uuid, delta: Uuid, data: &DataTree);

    /// Look up a payload, `Ok(None)` when the key was never written
    fn fetch_delta_data(&self, item: Uuid, delta: Uuid) -> Result<Option<DataTree>>;

    /// Drop a payload. Returns `true` if it existed.
    fn remove_delta_data(&self, item: Uuid, delta: Uuid) -> Result<bool>;

    /// Every key currently held
    fn keys(&self) -> Result<Vec<PackKey>>;

    /// Push deferred writes to durable storage
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Payload for a key, or the invalid tree when there is none yet
    fn create_delta_data_for(&self, item: Uuid, delta: Uuid) -> DataTree {
        match self.fetch_delta_data(item, delta) {
            Ok(Some(data)) => data,
            Ok(None) => {
                log::debug!("pack miss for {item}/{delta}");
                DataTree::invalid()
            }
            Err(e) => {
                log::warn!("pack read failed for {item}/{delta}: {e}");
                DataTree::invalid()
            }
        }
    }
}

/// In-memory pack (O(1) lookup via HashMap)
#[derive(Debug, Default)]
pub struct MemoryPack {
    entries: RwLock<HashMap<PackKey, DataTree>>,
}

impl MemoryPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// New pack behind a shared handle
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total stored payloads
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, item: Uuid, delta: Uuid) -> bool {
        self.entries.read().contains_key(&PackKey::new(item, delta))
    }
}

impl Pack for MemoryPack {
    fn set_delta_data_for(&self, item: Uuid, delta: Uuid, data: &DataTree) {
        self.entries
            .write()
            .insert(PackKey::new(item, delta), data.clone());
    }

    fn fetch_delta_data(&self, item: Uuid, delta: Uuid) -> Result<Option<DataTree>> {
        Ok(self.entries.read().get(&PackKey::new(item, delta)).cloned())
    }

    fn remove_delta_data(&self, item: Uuid, delta: Uuid) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .remove(&PackKey::new(item, delta))
            .is_some())
    }

    fn keys(&self) -> Result<Vec<PackKey>> {
        Ok(self.entries.read().keys().copied().collect())
    }
}
