//! Inter-DC Manager (IDM): outbound fan-out primitives and the inbound
//! dispatch contract (§4.4). IDM never mutates RR/VS/SE itself; inbound
//! handlers are implemented by the Replica Manager (see `handlers`).

pub mod handlers;
pub mod protocol;
pub mod transport;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::{DcId, LogicalTimestamp, ReplicaKey, StrategyKind, StrategyParams, Value};
use crate::error::{ControllerError, Result};
pub use handlers::InboundHandlers;
use protocol::{EvictSignal, NewReplica, NewReplicaAck, RemoteReadAck, ReplicaLocationAnnounce, UpdateAck, UpdateMsg};
pub use transport::InterDcTransport;

/// Default bounded timeouts for outbound RPC (§4.4): 1s for queries, 5s
/// for state-changing calls. Infinite is permitted only for control-plane
/// handshakes, which this design has none of.
#[derive(Debug, Clone, Copy)]
pub struct RpcTimeouts {
    pub query: Duration,
    pub mutating: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_millis(1000),
            mutating: Duration::from_millis(5000),
        }
    }
}

/// Aggregated outcome of a fan-out call: who acknowledged and who
/// didn't. A partial failure is reported up, never retried inside IDM
/// (§4.4, §7).
#[derive(Debug, Default, Clone)]
pub struct FanOutReport {
    pub succeeded: Vec<DcId>,
    pub failed: Vec<(DcId, ControllerError)>,
}

impl FanOutReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

async fn with_timeout<T>(to: &DcId, dur: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(dur, fut).await {
        Ok(res) => res,
        Err(_) => Err(ControllerError::Timeout {
            dc: to.0.clone(),
            millis: dur.as_millis() as u64,
        }),
    }
}

pub struct InterDcManager {
    transport: Arc<dyn InterDcTransport>,
    timeouts: RpcTimeouts,
}

impl InterDcManager {
    pub fn new(transport: Arc<dyn InterDcTransport>, timeouts: RpcTimeouts) -> Self {
        Self { transport, timeouts }
    }

    /// Best-effort, fire-and-forget multicast: every recipient records
    /// that `self` now replicates `key`. Failures are logged, never
    /// surfaced (§7).
    pub async fn gossip_replica_location(&self, key: &ReplicaKey, from: &DcId, peers: &[DcId]) {
        for to in peers {
            let msg = ReplicaLocationAnnounce {
                key: key.clone(),
                from: from.clone(),
            };
            let result = with_timeout(to, self.timeouts.query, self.transport.send_replica_location(to, msg)).await;
            if let Err(e) = result {
                warn!(dc = %to, key = %key, error = %e, "gossip_replica_location failed");
            }
        }
    }

    /// Instantiates `min_dcs_number - 1` additional replicas on the
    /// first that many peers (excluding self). Aggregates per-target
    /// outcomes; a partial failure is reported, not retried.
    pub async fn push_new_replica(
        &self,
        key: &ReplicaKey,
        value: Value,
        strategy: StrategyKind,
        params: StrategyParams,
        all_dcs: BTreeSet<DcId>,
        targets: &[DcId],
    ) -> FanOutReport {
        let mut report = FanOutReport::default();
        for to in targets {
            let msg = NewReplica {
                key: key.clone(),
                value: value.clone(),
                strategy,
                params: params.clone(),
                all_dcs: all_dcs.clone(),
            };
            let result = with_timeout(to, self.timeouts.mutating, self.transport.send_new_replica(to, msg)).await;
            match result {
                Ok(NewReplicaAck::Ok) => report.succeeded.push(to.clone()),
                Ok(NewReplicaAck::AlreadyExists) => report.succeeded.push(to.clone()),
                Err(e) => {
                    warn!(dc = %to, key = %key, error = %e, "push_new_replica failed");
                    report.failed.push((to.clone(), e));
                }
            }
        }
        report
    }

    /// Overwrites the value at every DC in `dcs` (excluding self) and
    /// stamps `ts`. Best-effort: logs partial failure but the caller
    /// (`ReplicaManager::update`) still returns `ok` as long as the
    /// local write succeeded (§7).
    pub async fn fan_out_update(
        &self,
        dcs: impl IntoIterator<Item = DcId>,
        key: &ReplicaKey,
        value: Value,
        params: StrategyParams,
        ts: LogicalTimestamp,
    ) -> FanOutReport {
        let mut report = FanOutReport::default();
        for to in dcs {
            let msg = UpdateMsg {
                key: key.clone(),
                value: value.clone(),
                params: params.clone(),
                ts: ts.clone(),
            };
            let result = with_timeout(&to, self.timeouts.mutating, self.transport.send_update(&to, msg)).await;
            match result {
                Ok(UpdateAck::Ok) | Ok(UpdateAck::NoReplica) => report.succeeded.push(to.clone()),
                Err(e) => {
                    warn!(dc = %to, key = %key, error = %e, "fan_out_update failed");
                    report.failed.push((to, e));
                }
            }
        }
        report
    }

    /// Tries each candidate DC in order, returning the first successful
    /// read; `NoDcs` if the candidate list is empty or every candidate
    /// failed.
    pub async fn read_from_any(&self, key: &ReplicaKey, dcs: impl IntoIterator<Item = DcId>) -> Result<Value> {
        let mut last_err = ControllerError::NoDcs;
        let mut tried_any = false;
        for to in dcs {
            tried_any = true;
            match with_timeout(&to, self.timeouts.query, self.transport.send_remote_read(&to, key)).await {
                Ok(RemoteReadAck::Ok(value)) => return Ok(value),
                Ok(RemoteReadAck::NoReplica) => {
                    last_err = ControllerError::NoReplica(key.to_string());
                }
                Err(e) => {
                    last_err = e;
                }
            }
        }
        if !tried_any {
            return Err(ControllerError::NoDcs);
        }
        Err(last_err)
    }

    /// Tells every DC in `dcs` (excluding self) to drop `self` from its
    /// `dcs` set for `key`. Fire-and-forget; failures are logged only.
    pub async fn broadcast_evict(&self, key: &ReplicaKey, from: &DcId, dcs: impl IntoIterator<Item = DcId>) {
        for to in dcs {
            let msg = EvictSignal {
                key: key.clone(),
                from: from.clone(),
            };
            let result = with_timeout(&to, self.timeouts.query, self.transport.send_evict_signal(&to, msg)).await;
            if let Err(e) = result {
                warn!(dc = %to, key = %key, error = %e, "broadcast_evict failed");
            }
        }
    }
}
