//! The durable storage backend is an external collaborator (§1, §6):
//! the persistent layer that durably holds a key's value and metadata.
//! It is explicitly out of scope for the replication engine itself, but
//! the engine still needs the seam -- this module is that seam plus an
//! in-memory stand-in good enough for tests and single-process demos.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{ReplicaKey, Value};
use crate::error::{ControllerError, Result};

/// Transactional per key; no multi-key transactions required (§6).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create(&self, key: &ReplicaKey, blob: Value) -> Result<()>;
    async fn read(&self, key: &ReplicaKey) -> Result<Value>;
    async fn upsert(&self, key: &ReplicaKey, blob: Value) -> Result<()>;
    async fn remove(&self, key: &ReplicaKey) -> Result<()>;
}

/// In-memory stand-in for the `data_item` table. A production deployment
/// swaps this for a real embedded or networked store; nothing else in
/// the engine needs to change since everything goes through the trait.
#[derive(Default)]
pub struct MemStorageBackend {
    rows: DashMap<ReplicaKey, Value>,
}

impl MemStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemStorageBackend {
    async fn create(&self, key: &ReplicaKey, blob: Value) -> Result<()> {
        match self.rows.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ControllerError::AlreadyExists(key.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(blob);
                Ok(())
            }
        }
    }

    async fn read(&self, key: &ReplicaKey) -> Result<Value> {
        self.rows
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    async fn upsert(&self, key: &ReplicaKey, blob: Value) -> Result<()> {
        self.rows.insert(key.clone(), blob);
        Ok(())
    }

    async fn remove(&self, key: &ReplicaKey) -> Result<()> {
        self.rows
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }
}
