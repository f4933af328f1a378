//! The inbound half of the inter-DC RPC surface. A transport
//! implementation, on receiving a wire message, dispatches into whatever
//! implements `InboundHandlers` -- in this crate, always the Replica
//! Manager (§4.4: "on_replica_location(K, from): call
//! RM.add_dc_to_replica(K, from)"). Keeping the trait here rather than
//! on `InterDcManager` avoids IDM holding a reference back to RM, which
//! would be the only cyclic ownership in the design (§9).

use async_trait::async_trait;

use crate::domain::{DcId, ReplicaKey};
use crate::interdc::protocol::{NewReplica, NewReplicaAck, RemoteReadAck, UpdateAck, UpdateMsg};

#[async_trait]
pub trait InboundHandlers: Send + Sync {
    async fn on_replica_location(&self, key: ReplicaKey, from: DcId);
    async fn on_new_replica(&self, msg: NewReplica) -> NewReplicaAck;
    async fn on_update(&self, msg: UpdateMsg) -> UpdateAck;
    async fn on_evict_signal(&self, key: ReplicaKey, from: DcId);
    async fn on_read(&self, key: ReplicaKey) -> RemoteReadAck;
}
