//! Wire-level contract for the inter-DC RPC surface (§6). Each message
//! carries `(key, op-tag, payload)`; here the op-tag is simply the Rust
//! enum variant, carried over whatever transport implements
//! `InterDcTransport`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{DcId, LogicalTimestamp, ReplicaKey, StrategyKind, StrategyParams, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaLocationAnnounce {
    pub key: ReplicaKey,
    pub from: DcId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReplica {
    pub key: ReplicaKey,
    pub value: Value,
    pub strategy: StrategyKind,
    pub params: StrategyParams,
    pub all_dcs: BTreeSet<DcId>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum NewReplicaAck {
    Ok,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMsg {
    pub key: ReplicaKey,
    pub value: Value,
    pub params: StrategyParams,
    pub ts: LogicalTimestamp,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum UpdateAck {
    Ok,
    NoReplica,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum RemoteReadAck {
    Ok(Value),
    NoReplica,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictSignal {
    pub key: ReplicaKey,
    pub from: DcId,
}
