//! Core data model: keys, values, DC identity, timestamps, strategy
//! parameters and the replica record. See the component design docs for
//! the invariants these types are built to preserve.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque key. Cloning is cheap (`Bytes` is refcounted).
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ReplicaKey(pub bytes::Bytes);

impl ReplicaKey {
    pub fn new(bytes: impl Into<bytes::Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_str(s: &str) -> Self {
        Self(bytes::Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl fmt::Debug for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "ReplicaKey({:?})", s),
            Err(_) => write!(f, "ReplicaKey({:?})", self.0),
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// Opaque value payload. Immutable once written; an update supersedes it
/// wholesale rather than mutating in place.
pub type Value = bytes::Bytes;

/// A stable, network-addressable identifier for a data center.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct DcId(pub String);

impl DcId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monotonic, cross-DC comparable timestamp used only to order update
/// fan-out for last-writer-wins. Ties on `wall_ms` are broken by a
/// per-DC sequence counter, and remaining ties (same DC issuing the same
/// millisecond twice is impossible given the counter, but two *different*
/// DCs racing at the same instant is not) are broken lexicographically by
/// `dc` -- this is the resolution for the concurrent-write tie-break that
/// the original design left ambiguous.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogicalTimestamp {
    pub wall_ms: u64,
    pub seq: u64,
    pub dc: DcId,
}

impl LogicalTimestamp {
    pub fn new(wall_ms: u64, seq: u64, dc: DcId) -> Self {
        Self { wall_ms, seq, dc }
    }
}

impl Ord for LogicalTimestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.wall_ms, self.seq, &self.dc).cmp(&(other.wall_ms, other.seq, &other.dc))
    }
}

impl PartialOrd for LogicalTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Selector for the per-key policy variant governing replication
/// decisions. Adding a policy means adding a variant here and a matching
/// `StrategyHandler` impl, not extending some runtime registry.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum StrategyKind {
    AdaptiveDecay,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::AdaptiveDecay
    }
}

/// Tunable parameters for a key's replication strategy. Immutable once
/// set unless explicitly reconfigured through `StrategyEngine::init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Ticks between automatic strength decrements.
    pub decay_time: std::time::Duration,
    /// Strength decrement applied per tick.
    pub decay_factor: f64,
    /// Strength at or above which a non-replica DC should acquire a copy.
    pub repl_threshold: f64,
    /// Strength at or below which a replica DC may drop its copy.
    pub rmv_threshold: f64,
    /// Upper clamp on strength.
    pub max_strength: f64,
    /// Strength gain per local read.
    pub rstrength: f64,
    /// Strength gain per local write.
    pub wstrength: f64,
    /// Minimum number of DCs that must hold a replica at creation time.
    pub min_dcs_number: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            decay_time: std::time::Duration::from_secs(1),
            decay_factor: 10.0,
            repl_threshold: 100.0,
            rmv_threshold: 20.0,
            max_strength: 500.0,
            rstrength: 60.0,
            wstrength: 60.0,
            min_dcs_number: 1,
        }
    }
}

/// One entry per key known to this DC's replica registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub key: ReplicaKey,
    /// True iff this DC currently holds the value in the value store.
    pub replicated: bool,
    /// Monotonically nonnegative, clamped to `[0, params.max_strength]`.
    /// Volatile: not part of the persisted `data_info` row (§6).
    pub strength: f64,
    pub strategy: StrategyKind,
    pub params: StrategyParams,
    /// DCs known to hold a replica, including self iff `replicated`.
    pub dcs: BTreeSet<DcId>,
    pub last_update_ts: LogicalTimestamp,
}

/// Derived view of a record for logging/telemetry only -- never a second
/// source of truth for `replicated`/`dcs`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReplicaState {
    RemoteOnly,
    Replicated,
}

impl ReplicaRecord {
    pub fn state(&self) -> ReplicaState {
        if self.replicated {
            ReplicaState::Replicated
        } else {
            ReplicaState::RemoteOnly
        }
    }
}
