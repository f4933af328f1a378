//! The transport layer is an external collaborator (§1): in production
//! it would be a real network client. This module defines the seam
//! (`InterDcTransport`) and ships an in-process stand-in good enough to
//! drive the integration scenarios in `tests/scenarios.rs` without a
//! socket in sight.

use std::future::pending;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{DcId, ReplicaKey};
use crate::error::{ControllerError, Result};
use crate::interdc::handlers::InboundHandlers;
use crate::interdc::protocol::{
    EvictSignal, NewReplica, NewReplicaAck, RemoteReadAck, ReplicaLocationAnnounce, UpdateAck,
    UpdateMsg,
};

/// The outbound half of the inter-DC RPC surface (§6). Implementations
/// are responsible only for getting bytes to a peer and back -- timeouts
/// and fan-out aggregation live one layer up, in `InterDcManager`.
#[async_trait]
pub trait InterDcTransport: Send + Sync {
    async fn send_replica_location(&self, to: &DcId, msg: ReplicaLocationAnnounce) -> Result<()>;
    async fn send_new_replica(&self, to: &DcId, msg: NewReplica) -> Result<NewReplicaAck>;
    async fn send_update(&self, to: &DcId, msg: UpdateMsg) -> Result<UpdateAck>;
    async fn send_remote_read(&self, to: &DcId, key: &ReplicaKey) -> Result<RemoteReadAck>;
    async fn send_evict_signal(&self, to: &DcId, msg: EvictSignal) -> Result<()>;
}

/// Routes calls directly to a peer's `InboundHandlers` in the same
/// process. `partition` lets tests simulate an unreachable DC: a
/// partitioned target never completes its future, so the timeout
/// wrapper in `InterDcManager` is what actually observes the failure --
/// exactly as a real dropped connection would behave.
#[derive(Default)]
pub struct InMemoryTransport {
    peers: DashMap<DcId, Arc<dyn InboundHandlers>>,
    partitioned: DashMap<DcId, ()>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dc: DcId, handlers: Arc<dyn InboundHandlers>) {
        self.peers.insert(dc, handlers);
    }

    pub fn partition(&self, dc: DcId) {
        self.partitioned.insert(dc, ());
    }

    pub fn heal(&self, dc: &DcId) {
        self.partitioned.remove(dc);
    }

    async fn peer(&self, to: &DcId) -> Result<Arc<dyn InboundHandlers>> {
        if self.partitioned.contains_key(to) {
            pending::<()>().await;
            unreachable!("partitioned peer never resolves");
        }
        self.peers
            .get(to)
            .map(|p| p.clone())
            .ok_or_else(|| ControllerError::NoDcs)
    }
}

#[async_trait]
impl InterDcTransport for InMemoryTransport {
    async fn send_replica_location(&self, to: &DcId, msg: ReplicaLocationAnnounce) -> Result<()> {
        let peer = self.peer(to).await?;
        peer.on_replica_location(msg.key, msg.from).await;
        Ok(())
    }

    async fn send_new_replica(&self, to: &DcId, msg: NewReplica) -> Result<NewReplicaAck> {
        let peer = self.peer(to).await?;
        Ok(peer.on_new_replica(msg).await)
    }

    async fn send_update(&self, to: &DcId, msg: UpdateMsg) -> Result<UpdateAck> {
        let peer = self.peer(to).await?;
        Ok(peer.on_update(msg).await)
    }

    async fn send_remote_read(&self, to: &DcId, key: &ReplicaKey) -> Result<RemoteReadAck> {
        let peer = self.peer(to).await?;
        Ok(peer.on_read(key.clone()).await)
    }

    async fn send_evict_signal(&self, to: &DcId, msg: EvictSignal) -> Result<()> {
        let peer = self.peer(to).await?;
        peer.on_evict_signal(msg.key, msg.from).await;
        Ok(())
    }
}
