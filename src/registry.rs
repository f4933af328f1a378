//! Replica Registry (RR): single source of truth for "who holds what".
//! All writes are serialized by the caller (the Replica Manager's
//! per-key lock); the map itself only needs to be internally consistent
//! under concurrent access to *different* keys.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{ReplicaKey, ReplicaRecord};
use crate::error::{ControllerError, Result};

#[async_trait]
pub trait ReplicaRegistry: Send + Sync {
    async fn create(&self, record: ReplicaRecord) -> Result<()>;
    async fn read(&self, key: &ReplicaKey) -> Result<ReplicaRecord>;
    async fn update(&self, record: ReplicaRecord) -> Result<()>;
    async fn remove(&self, key: &ReplicaKey) -> Result<()>;
}

#[derive(Default)]
pub struct MemReplicaRegistry {
    records: DashMap<ReplicaKey, ReplicaRecord>,
}

impl MemReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplicaRegistry for MemReplicaRegistry {
    async fn create(&self, record: ReplicaRecord) -> Result<()> {
        match self.records.entry(record.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ControllerError::AlreadyExists(record.key.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn read(&self, key: &ReplicaKey) -> Result<ReplicaRecord> {
        self.records
            .get(key)
            .map(|r| r.clone())
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    async fn update(&self, record: ReplicaRecord) -> Result<()> {
        if !self.records.contains_key(&record.key) {
            return Err(ControllerError::NotFound(record.key.to_string()));
        }
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &ReplicaKey) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}
