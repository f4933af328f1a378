//! Value Store (VS): the plain keyed cache + optional durable backing.
//! VS has no notion of replication -- that is imposed entirely by the
//! Replica Manager. See `backend` for the storage-backend collaborator.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::backend::StorageBackend;
use crate::domain::{ReplicaKey, Value};
use crate::error::{ControllerError, Result};

#[async_trait]
pub trait ValueStore: Send + Sync {
    async fn put(&self, key: &ReplicaKey, value: Value) -> Result<()>;
    async fn get(&self, key: &ReplicaKey) -> Result<Value>;
    async fn remove(&self, key: &ReplicaKey) -> Result<()>;
    fn contains(&self, key: &ReplicaKey) -> bool;
}

/// In-memory value store. Each operation is O(1) and lock-free under
/// `DashMap`'s sharding; no cross-key coordination happens here, only in
/// the Replica Manager's per-key lock.
#[derive(Default)]
pub struct MemValueStore {
    values: DashMap<ReplicaKey, Value>,
}

impl MemValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValueStore for MemValueStore {
    async fn put(&self, key: &ReplicaKey, value: Value) -> Result<()> {
        self.values.insert(key.clone(), value);
        Ok(())
    }

    async fn get(&self, key: &ReplicaKey) -> Result<Value> {
        self.values
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &ReplicaKey) -> Result<()> {
        self.values
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    fn contains(&self, key: &ReplicaKey) -> bool {
        self.values.contains_key(key)
    }
}

/// A value store that mirrors every mutation into an external durable
/// `StorageBackend` (the `data_item` table from §6's persisted state
/// layout), while still serving reads from the in-memory cache. This is
/// the glue the core itself does not need but that a deployed DC does.
pub struct BackedValueStore<B: StorageBackend> {
    cache: MemValueStore,
    backend: B,
}

impl<B: StorageBackend> BackedValueStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            cache: MemValueStore::new(),
            backend,
        }
    }
}

#[async_trait]
impl<B: StorageBackend + Send + Sync> ValueStore for BackedValueStore<B> {
    async fn put(&self, key: &ReplicaKey, value: Value) -> Result<()> {
        self.backend.upsert(key, value.clone()).await?;
        self.cache.put(key, value).await
    }

    async fn get(&self, key: &ReplicaKey) -> Result<Value> {
        if let Ok(v) = self.cache.get(key).await {
            return Ok(v);
        }
        let v = self.backend.read(key).await?;
        self.cache.put(key, v.clone()).await?;
        Ok(v)
    }

    async fn remove(&self, key: &ReplicaKey) -> Result<()> {
        self.backend.remove(key).await?;
        // Removal may legitimately race a concurrent eviction from the
        // cache; either way the backend is now the source of truth.
        let _ = self.cache.remove(key).await;
        Ok(())
    }

    fn contains(&self, key: &ReplicaKey) -> bool {
        self.cache.contains(key)
    }
}
