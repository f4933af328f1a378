//! Replica Manager (RM): the client-facing façade orchestrating
//! VS + RR + SE + IDM on every public operation (§4.5), and the
//! landing spot for every inbound inter-DC RPC (§4.4).
//!
//! Every mutating operation on a key is serialized through `KeyLocks`
//! before touching SE/RR/VS/IDM, which is what realizes the "total
//! order per key, no order across keys" guarantee from §5.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::domain::{DcId, LogicalTimestamp, ReplicaKey, ReplicaRecord, StrategyKind, StrategyParams, Value};
use crate::error::{ControllerError, Result};
use crate::interdc::handlers::InboundHandlers;
use crate::interdc::protocol::{NewReplica, NewReplicaAck, RemoteReadAck, UpdateAck, UpdateMsg};
use crate::interdc::InterDcManager;
use crate::registry::ReplicaRegistry;
use crate::store::ValueStore;
use crate::strategy::{SeDecision, StrategyEngine};

/// Per-key async mutex table. Keys are sharded across DashMap's internal
/// locks for the table itself; each individual key then gets its own
/// `tokio::sync::Mutex` so RM operations can `.await` (on IDM RPCs)
/// while still holding exclusive access to that key, without blocking
/// unrelated keys.
#[derive(Default)]
struct KeyLocks {
    locks: DashMap<ReplicaKey, Arc<AsyncMutex<()>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &ReplicaKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

/// Telemetry counters surfaced by the Replica Manager. `last_replica_retained`
/// is the counter named explicitly in scenario S6.
#[derive(Default)]
pub struct ControllerStats {
    pub last_replica_retained: AtomicU64,
}

pub struct ReplicaManager {
    self_dc: DcId,
    peers: Vec<DcId>,
    vs: Arc<dyn ValueStore>,
    rr: Arc<dyn ReplicaRegistry>,
    se: Arc<StrategyEngine>,
    idm: Arc<InterDcManager>,
    locks: KeyLocks,
    ts_seq: AtomicU64,
    last_ticked: DashMap<ReplicaKey, Instant>,
    pub stats: Arc<ControllerStats>,
}

/// Builder for dependency-injected construction of a `ReplicaManager`.
pub struct ReplicaManagerBuilder {
    self_dc: Option<DcId>,
    peers: Vec<DcId>,
    vs: Option<Arc<dyn ValueStore>>,
    rr: Option<Arc<dyn ReplicaRegistry>>,
    se: Option<Arc<StrategyEngine>>,
    idm: Option<Arc<InterDcManager>>,
}

impl ReplicaManagerBuilder {
    pub fn new() -> Self {
        Self {
            self_dc: None,
            peers: Vec::new(),
            vs: None,
            rr: None,
            se: None,
            idm: None,
        }
    }

    pub fn with_self_dc(mut self, dc: DcId) -> Self {
        self.self_dc = Some(dc);
        self
    }

    pub fn with_peers(mut self, peers: Vec<DcId>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_value_store(mut self, vs: Arc<dyn ValueStore>) -> Self {
        self.vs = Some(vs);
        self
    }

    pub fn with_registry(mut self, rr: Arc<dyn ReplicaRegistry>) -> Self {
        self.rr = Some(rr);
        self
    }

    pub fn with_strategy_engine(mut self, se: Arc<StrategyEngine>) -> Self {
        self.se = Some(se);
        self
    }

    pub fn with_interdc_manager(mut self, idm: Arc<InterDcManager>) -> Self {
        self.idm = Some(idm);
        self
    }

    pub fn build(self) -> Result<ReplicaManager> {
        Ok(ReplicaManager {
            self_dc: self
                .self_dc
                .ok_or_else(|| ControllerError::BackendError("missing self_dc".into()))?,
            peers: self.peers,
            vs: self
                .vs
                .ok_or_else(|| ControllerError::BackendError("missing value store".into()))?,
            rr: self
                .rr
                .ok_or_else(|| ControllerError::BackendError("missing replica registry".into()))?,
            se: self.se.unwrap_or_else(|| Arc::new(StrategyEngine::new())),
            idm: self
                .idm
                .ok_or_else(|| ControllerError::BackendError("missing inter-dc manager".into()))?,
            locks: KeyLocks::default(),
            ts_seq: AtomicU64::new(0),
            last_ticked: DashMap::new(),
            stats: Arc::new(ControllerStats::default()),
        })
    }
}

impl Default for ReplicaManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaManager {
    fn now_ts(&self) -> LogicalTimestamp {
        let wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let seq = self.ts_seq.fetch_add(1, Ordering::Relaxed);
        LogicalTimestamp::new(wall_ms, seq, self.self_dc.clone())
    }

    async fn lock_key(&self, key: &ReplicaKey) -> OwnedMutexGuard<()> {
        self.locks.acquire(key).await
    }

    pub fn self_dc(&self) -> &DcId {
        &self.self_dc
    }

    /// Debug/telemetry accessor for the registry's current view of a key
    /// -- used by tests and operational tooling to check invariant 2
    /// (`replicated ⇔ self∈dcs ⇔ VS.contains`) directly against the
    /// record, rather than inferring it from `read`'s return value alone.
    pub async fn record_of(&self, key: &ReplicaKey) -> Result<ReplicaRecord> {
        self.rr.read(key).await
    }

    pub fn replicated_locally(&self, key: &ReplicaKey) -> bool {
        self.vs.contains(key)
    }

    /// §4.5 `create`: preconditions require `key` not already exist in
    /// RR. Cross-DC establishment for a pre-existing key happens only
    /// through inbound `on_new_replica`/`on_replica_location` -- `create`
    /// never reaches out to check remote existence (§9 Open Question 3).
    pub async fn create(
        &self,
        key: ReplicaKey,
        value: Value,
        strategy: StrategyKind,
        params: StrategyParams,
    ) -> Result<()> {
        let _guard = self.lock_key(&key).await;

        if self.rr.read(&key).await.is_ok() {
            return Err(ControllerError::AlreadyExists(key.to_string()));
        }

        self.se.init_strategy(&key, strategy, true, params.clone());
        let strength = self.se.strength_of(&key).unwrap_or(params.repl_threshold);

        let mut dcs = BTreeSet::new();
        dcs.insert(self.self_dc.clone());

        let record = ReplicaRecord {
            key: key.clone(),
            replicated: true,
            strength,
            strategy,
            params: params.clone(),
            dcs: dcs.clone(),
            last_update_ts: self.now_ts(),
        };
        self.rr.create(record).await?;
        self.vs.put(&key, value.clone()).await?;

        self.idm.gossip_replica_location(&key, &self.self_dc, &self.peers).await;

        let additional = params.min_dcs_number.saturating_sub(1);
        let targets: Vec<DcId> = self.peers.iter().take(additional).cloned().collect();
        if !targets.is_empty() {
            let mut all_dcs = dcs.clone();
            all_dcs.extend(targets.iter().cloned());

            let report = self
                .idm
                .push_new_replica(&key, value, strategy, params, all_dcs, &targets)
                .await;
            if !report.all_ok() {
                warn!(key = %key, failed = report.failed.len(), "create: partial push_new_replica failure");
            }

            // Only merge in targets `push_new_replica` actually confirmed --
            // a timed-out target never ran `on_new_replica`, so it must not
            // be recorded here as holding a replica (invariant 2).
            if !report.succeeded.is_empty() {
                if let Ok(mut rec) = self.rr.read(&key).await {
                    rec.dcs.extend(report.succeeded.iter().cloned());
                    let _ = self.rr.update(rec).await;
                }
            }
        }

        info!(key = %key, dc = %self.self_dc, "created");
        Ok(())
    }

    /// §4.5 `read`.
    pub async fn read(&self, key: &ReplicaKey) -> Result<Value> {
        let _guard = self.lock_key(key).await;

        // A DC that only knows this key through gossip must still decay
        // and admit on the key's real thresholds, not the engine's
        // lazy-default ones, so sync SE to the registry's record before
        // recording the access.
        let known = self.rr.read(key).await.ok();
        if let Some(rec) = &known {
            self.se.init_strategy(key, rec.strategy, rec.replicated, rec.params.clone());
        }
        let decision = self.se.local_read(key);

        if let Ok(value) = self.vs.get(key).await {
            // Already replicated here; a SHOULD_REPLICATE decision is a
            // no-op in this branch (§4.5 step 2).
            return Ok(value);
        }

        let record = known.ok_or_else(|| ControllerError::NotFound(key.to_string()))?;
        if record.dcs.is_empty() {
            return Err(ControllerError::NotFound(key.to_string()));
        }

        let candidates: Vec<DcId> = record
            .dcs
            .iter()
            .filter(|dc| **dc != self.self_dc)
            .cloned()
            .collect();
        let value = self.idm.read_from_any(key, candidates).await?;

        if decision == SeDecision::ShouldReplicate {
            self.vs.put(key, value.clone()).await?;
            let mut rec = record;
            rec.replicated = true;
            rec.dcs.insert(self.self_dc.clone());
            // §4.5 step 3 sets the registry's volatile strength mirror to
            // `repl_threshold` exactly on admission; the engine's own
            // internal counter keeps whatever it had already accumulated.
            rec.strength = rec.params.repl_threshold;
            self.rr.update(rec).await?;
            self.se.set_replicated_here(key, true);
            self.idm.gossip_replica_location(key, &self.self_dc, &self.peers).await;
            debug!(key = %key, "admitted replica from remote read");
        }

        Ok(value)
    }

    /// §4.5 `update`.
    pub async fn update(&self, key: &ReplicaKey, value: Value) -> Result<()> {
        let _guard = self.lock_key(key).await;
        let ts = self.now_ts();

        let mut record = self
            .rr
            .read(key)
            .await
            .map_err(|_| ControllerError::NotFound(key.to_string()))?;
        self.se
            .init_strategy(key, record.strategy, record.replicated, record.params.clone());
        self.se.local_write(key);

        if record.replicated {
            self.vs.put(key, value.clone()).await?;
        }
        record.last_update_ts = ts.clone();
        let params = record.params.clone();
        let targets: Vec<DcId> = record
            .dcs
            .iter()
            .filter(|dc| **dc != self.self_dc)
            .cloned()
            .collect();
        self.rr.update(record).await?;

        let report = self.idm.fan_out_update(targets, key, value, params, ts).await;
        if !report.all_ok() {
            warn!(key = %key, failed = report.failed.len(), "update: partial fan-out failure");
        }

        Ok(())
    }

    /// §4.5 `remove_replica`: local eviction, the global key persists.
    pub async fn remove_replica(&self, key: &ReplicaKey) -> Result<()> {
        let _guard = self.lock_key(key).await;
        let record = match self.rr.read(key).await {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        self.evict_locally(key, record).await
    }

    async fn evict_locally(&self, key: &ReplicaKey, mut record: ReplicaRecord) -> Result<()> {
        if self.vs.contains(key) {
            self.vs.remove(key).await?;
        }
        record.replicated = false;
        record.strength = 0.0;
        record.dcs.remove(&self.self_dc);
        let targets: Vec<DcId> = record.dcs.iter().cloned().collect();
        self.rr.update(record).await?;
        self.se.set_replicated_here(key, false);
        self.idm.broadcast_evict(key, &self.self_dc, targets).await;
        Ok(())
    }

    /// §4.5 `add_dc_to_replica` (inbound gossip target): idempotent set
    /// mutation; creates a non-replicated stub if no record exists.
    pub async fn add_dc_to_replica(&self, key: &ReplicaKey, dc: DcId) {
        let _guard = self.lock_key(key).await;
        match self.rr.read(key).await {
            Ok(mut record) => {
                if record.dcs.insert(dc) {
                    let _ = self.rr.update(record).await;
                }
            }
            Err(_) => {
                let mut dcs = BTreeSet::new();
                dcs.insert(dc);
                let record = ReplicaRecord {
                    key: key.clone(),
                    replicated: false,
                    strength: 0.0,
                    strategy: StrategyKind::default(),
                    params: StrategyParams::default(),
                    dcs,
                    last_update_ts: self.now_ts(),
                };
                let _ = self.rr.create(record).await;
            }
        }
    }

    /// §4.5 `remove_dc_from_replica` (inbound evict target).
    pub async fn remove_dc_from_replica(&self, key: &ReplicaKey, dc: &DcId) {
        let _guard = self.lock_key(key).await;
        if let Ok(mut record) = self.rr.read(key).await {
            if record.dcs.remove(dc) {
                let _ = self.rr.update(record).await;
            }
        }
    }

    /// Drives one `tick` event for `key` (§4.3). A `ShouldEvict` decision
    /// from SE is honored only if more than one DC currently holds a
    /// replica; otherwise the replica is retained and
    /// `LAST_REPLICA_RETAINED` telemetry increments (scenario S6) --
    /// exactly the split described in §4.3: SE decides purely from
    /// strength, RM is the one that knows and enforces the `|dcs| > 1`
    /// floor.
    pub async fn run_tick(&self, key: &ReplicaKey) {
        let _guard = self.lock_key(key).await;
        let record = match self.rr.read(key).await {
            Ok(r) => r,
            Err(_) => return,
        };
        self.se
            .init_strategy(key, record.strategy, record.replicated, record.params.clone());
        if self.se.tick(key) != SeDecision::ShouldEvict {
            return;
        }
        if !record.replicated {
            return;
        }
        if record.dcs.len() <= 1 {
            self.stats.last_replica_retained.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "last replica retained");
            return;
        }
        if let Err(e) = self.evict_locally(key, record).await {
            warn!(key = %key, error = %e, "decay-driven eviction failed");
        }
    }

    /// Background driver: for every key SE knows about, fires `run_tick`
    /// once its `decay_time` has elapsed since the last tick. A single
    /// scheduler loop covers all keys regardless of each key's own
    /// `decay_time`, polling at `poll_interval` and only actually ticking
    /// keys that are due -- this keeps the runtime to one task per DC
    /// rather than one per key.
    pub async fn run_tick_loop(self: Arc<Self>, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            let now = Instant::now();
            for key in self.se.known_keys() {
                let due = match self.last_ticked.get(&key) {
                    Some(last) => now.duration_since(*last) >= poll_interval,
                    None => true,
                };
                if due {
                    self.last_ticked.insert(key.clone(), now);
                    self.run_tick(&key).await;
                }
            }
        }
    }
}

#[async_trait]
impl InboundHandlers for ReplicaManager {
    async fn on_replica_location(&self, key: ReplicaKey, from: DcId) {
        self.add_dc_to_replica(&key, from).await;
    }

    async fn on_new_replica(&self, msg: NewReplica) -> NewReplicaAck {
        let _guard = self.lock_key(&msg.key).await;
        self.se.init_strategy(&msg.key, msg.strategy, true, msg.params.clone());

        // A record may already exist here as a non-replicated gossip stub
        // (from an earlier `on_replica_location`) -- that is not a true
        // `AlreadyExists`, it's exactly the `RemoteOnly -> Replicated`
        // transition this handler is supposed to drive. Only a record that
        // is *already replicated* here is a genuine duplicate push.
        match self.rr.read(&msg.key).await {
            Ok(mut existing) => {
                if existing.replicated {
                    return NewReplicaAck::AlreadyExists;
                }
                existing.replicated = true;
                existing.strength = msg.params.repl_threshold;
                existing.strategy = msg.strategy;
                existing.params = msg.params.clone();
                existing.dcs = msg.all_dcs;
                existing.last_update_ts = self.now_ts();
                if self.rr.update(existing).await.is_err() {
                    return NewReplicaAck::AlreadyExists;
                }
            }
            Err(_) => {
                let record = ReplicaRecord {
                    key: msg.key.clone(),
                    replicated: true,
                    strength: msg.params.repl_threshold,
                    strategy: msg.strategy,
                    params: msg.params.clone(),
                    dcs: msg.all_dcs,
                    last_update_ts: self.now_ts(),
                };
                if self.rr.create(record).await.is_err() {
                    return NewReplicaAck::AlreadyExists;
                }
            }
        }

        if self.vs.put(&msg.key, msg.value).await.is_err() {
            warn!(key = %msg.key, "on_new_replica: value store put failed");
        }
        NewReplicaAck::Ok
    }

    async fn on_update(&self, msg: UpdateMsg) -> UpdateAck {
        let _guard = self.lock_key(&msg.key).await;
        match self.rr.read(&msg.key).await {
            Ok(mut record) => {
                if msg.ts > record.last_update_ts {
                    if self.vs.put(&msg.key, msg.value).await.is_err() {
                        warn!(key = %msg.key, "on_update: value store put failed");
                    }
                    record.last_update_ts = msg.ts;
                    let _ = self.rr.update(record).await;
                }
                UpdateAck::Ok
            }
            Err(_) => UpdateAck::NoReplica,
        }
    }

    async fn on_evict_signal(&self, key: ReplicaKey, from: DcId) {
        self.remove_dc_from_replica(&key, &from).await;
    }

    async fn on_read(&self, key: ReplicaKey) -> RemoteReadAck {
        match self.vs.get(&key).await {
            Ok(value) => RemoteReadAck::Ok(value),
            Err(_) => RemoteReadAck::NoReplica,
        }
    }
}
