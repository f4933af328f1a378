//! Integration tests wiring two or three `ReplicaManager`s over a
//! shared `InMemoryTransport` in one process, implementing the
//! controller's scenario walkthroughs end to end.

use std::sync::Arc;
use std::time::Duration;

use adaptive_replicad::backend::MemStorageBackend;
use adaptive_replicad::domain::{DcId, ReplicaKey, StrategyKind, StrategyParams, Value};
use adaptive_replicad::error::ControllerError;
use adaptive_replicad::interdc::transport::InMemoryTransport;
use adaptive_replicad::interdc::{InterDcManager, RpcTimeouts};
use adaptive_replicad::manager::{ReplicaManager, ReplicaManagerBuilder};
use adaptive_replicad::registry::MemReplicaRegistry;
use adaptive_replicad::store::BackedValueStore;
use adaptive_replicad::strategy::StrategyEngine;
use std::sync::atomic::Ordering;

fn build_dc(self_dc: &str, peers: &[&str], transport: Arc<InMemoryTransport>, timeouts: RpcTimeouts) -> Arc<ReplicaManager> {
    let idm = Arc::new(InterDcManager::new(transport, timeouts));
    Arc::new(
        ReplicaManagerBuilder::new()
            .with_self_dc(DcId::new(self_dc))
            .with_peers(peers.iter().map(|p| DcId::new(*p)).collect())
            .with_value_store(Arc::new(BackedValueStore::new(MemStorageBackend::new())))
            .with_registry(Arc::new(MemReplicaRegistry::new()))
            .with_strategy_engine(Arc::new(StrategyEngine::new()))
            .with_interdc_manager(idm)
            .build()
            .unwrap(),
    )
}

fn two_dc_cluster() -> (Arc<InMemoryTransport>, Arc<ReplicaManager>, Arc<ReplicaManager>) {
    let transport = Arc::new(InMemoryTransport::new());
    let a = build_dc("a", &["b"], transport.clone(), RpcTimeouts::default());
    let b = build_dc("b", &["a"], transport.clone(), RpcTimeouts::default());
    transport.register(DcId::new("a"), a.clone());
    transport.register(DcId::new("b"), b.clone());
    (transport, a, b)
}

#[tokio::test]
async fn s1_single_dc_create_read_update_remove() {
    let transport = Arc::new(InMemoryTransport::new());
    let a = build_dc("a", &[], transport.clone(), RpcTimeouts::default());
    transport.register(DcId::new("a"), a.clone());

    let key = ReplicaKey::from_str("k");
    let mut params = StrategyParams::default();
    params.min_dcs_number = 1;

    a.create(key.clone(), Value::from_static(b"v0"), StrategyKind::AdaptiveDecay, params)
        .await
        .unwrap();
    assert_eq!(a.read(&key).await.unwrap(), Value::from_static(b"v0"));

    a.update(&key, Value::from_static(b"v1")).await.unwrap();
    assert_eq!(a.read(&key).await.unwrap(), Value::from_static(b"v1"));

    a.remove_replica(&key).await.unwrap();
    assert!(matches!(a.read(&key).await, Err(ControllerError::NotFound(_))));
}

#[tokio::test]
async fn s2_two_dc_acquisition_via_read_pressure() {
    let (_transport, a, b) = two_dc_cluster();

    let key = ReplicaKey::from_str("k");
    let mut params = StrategyParams::default();
    params.repl_threshold = 100.0;
    params.rstrength = 60.0;
    params.min_dcs_number = 1; // only gossip, no forced push to B

    a.create(key.clone(), Value::from_static(b"v"), StrategyKind::AdaptiveDecay, params)
        .await
        .unwrap();

    // First read from B serves from A; B has not admitted a copy yet.
    assert_eq!(b.read(&key).await.unwrap(), Value::from_static(b"v"));
    a.remove_replica(&key).await.unwrap();
    assert!(
        matches!(b.read(&key).await, Err(ControllerError::NotFound(_))),
        "B must not have a local copy after a single read below threshold"
    );

    // Re-establish at A and repeat: this time two reads from B cross the
    // 100-strength threshold (60 + 60 = 120).
    let mut params = StrategyParams::default();
    params.repl_threshold = 100.0;
    params.rstrength = 60.0;
    params.min_dcs_number = 1;
    a.create(key.clone(), Value::from_static(b"v2"), StrategyKind::AdaptiveDecay, params)
        .await
        .unwrap();
    b.read(&key).await.unwrap();
    b.read(&key).await.unwrap();

    a.remove_replica(&key).await.unwrap();
    assert_eq!(
        b.read(&key).await.unwrap(),
        Value::from_static(b"v2"),
        "B must be able to serve the key locally once admitted, even with A's copy gone"
    );
}

#[tokio::test]
async fn s3_update_fans_out_to_existing_replicas() {
    let (_transport, a, b) = two_dc_cluster();

    let key = ReplicaKey::from_str("k");
    let mut params = StrategyParams::default();
    params.min_dcs_number = 2; // pushes a second replica to B at create time
    a.create(key.clone(), Value::from_static(b"v"), StrategyKind::AdaptiveDecay, params)
        .await
        .unwrap();

    a.update(&key, Value::from_static(b"v2")).await.unwrap();

    // Invariant 2 on B, independent of A: fan-out must leave B's own
    // record consistent with its own VS, not merely readable via remote
    // fetch from A.
    let record_b = b.record_of(&key).await.unwrap();
    assert!(record_b.replicated);
    assert!(record_b.dcs.contains(&DcId::new("b")));
    assert!(b.replicated_locally(&key));

    a.remove_replica(&key).await.unwrap();
    assert_eq!(
        b.read(&key).await.unwrap(),
        Value::from_static(b"v2"),
        "B should already hold the fanned-out update without needing a remote fetch"
    );
}

#[tokio::test]
async fn s4_decay_driven_eviction() {
    let (_transport, a, b) = two_dc_cluster();

    let key = ReplicaKey::from_str("k");
    let mut params = StrategyParams::default();
    params.min_dcs_number = 2;
    params.decay_time = Duration::from_secs(1);
    params.decay_factor = 50.0;
    params.rmv_threshold = 20.0;
    params.repl_threshold = 100.0;
    a.create(key.clone(), Value::from_static(b"v'"), StrategyKind::AdaptiveDecay, params)
        .await
        .unwrap();

    // B was admitted at create time with strength = repl_threshold = 100.
    // Three ticks: 100 -> 50 -> 0 (clamped), both at or below rmv_threshold
    // from the second tick onward; the second tick evicts.
    b.run_tick(&key).await;
    b.run_tick(&key).await;
    b.run_tick(&key).await;

    assert_eq!(
        a.read(&key).await.unwrap(),
        Value::from_static(b"v'"),
        "A's own copy is unaffected by B's local decay"
    );

    // B no longer holds a local copy; reading now requires a remote fetch.
    let got = b.read(&key).await.unwrap();
    assert_eq!(got, Value::from_static(b"v'"));
}

#[tokio::test]
async fn s5_timeout_on_unreachable_peer_still_returns_ok() {
    let transport = Arc::new(InMemoryTransport::new());
    transport.partition(DcId::new("b"));

    let short_timeouts = RpcTimeouts {
        query: Duration::from_millis(20),
        mutating: Duration::from_millis(20),
    };
    let a = build_dc("a", &["b"], transport.clone(), short_timeouts);
    transport.register(DcId::new("a"), a.clone());

    let key = ReplicaKey::from_str("k");
    let mut params = StrategyParams::default();
    params.min_dcs_number = 2; // targets the partitioned peer "b"
    a.create(key.clone(), Value::from_static(b"v"), StrategyKind::AdaptiveDecay, params)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    a.update(&key, Value::from_static(b"v2")).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(a.read(&key).await.unwrap(), Value::from_static(b"v2"));
}

#[tokio::test]
async fn s6_minimum_replica_retention() {
    let transport = Arc::new(InMemoryTransport::new());
    let a = build_dc("a", &[], transport.clone(), RpcTimeouts::default());
    transport.register(DcId::new("a"), a.clone());

    let key = ReplicaKey::from_str("k");
    let mut params = StrategyParams::default();
    params.decay_factor = 1000.0; // collapses strength to 0 in a single tick
    params.rmv_threshold = 20.0;
    a.create(key.clone(), Value::from_static(b"v"), StrategyKind::AdaptiveDecay, params)
        .await
        .unwrap();

    a.run_tick(&key).await;

    assert_eq!(a.stats.last_replica_retained.load(Ordering::Relaxed), 1);
    assert_eq!(a.read(&key).await.unwrap(), Value::from_static(b"v"));
}
