//! Strategy Engine (SE): one logical state machine per key, deciding
//! admit/evict from local access pressure alone. SE emits decisions only
//! -- it never touches the registry, the value store, or issues RPC; the
//! Replica Manager observes what SE returns and acts on it (§4.3).
//!
//! The engine is a tagged variant dispatched through `StrategyHandler` so
//! that adding a policy means adding a variant, not extending a runtime
//! registry (§9 Design Notes).

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::domain::{ReplicaKey, StrategyKind, StrategyParams};

/// A decision emitted by a strategy handler in response to an event.
/// Never surfaces dcs-set size -- whether to honor `ShouldEvict` when
/// only one DC holds a replica is the Replica Manager's call, not the
/// engine's (see `manager::ReplicaManager::run_tick`, and scenario S6).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SeDecision {
    NoChange,
    ShouldReplicate,
    ShouldEvict,
}

/// The pluggable per-key policy interface. Implementors hold whatever
/// state they need (the adaptive-decay policy holds a strength counter);
/// the engine above only ever sees `SeDecision`.
pub trait StrategyHandler: Send + Sync {
    /// Idempotent bootstrap. A second call with identical `params` must
    /// not reset any already-accumulated state; a second call with
    /// different `params` reconfigures params only.
    fn init(&mut self, replicated_here: bool, params: StrategyParams);
    fn on_read(&mut self) -> SeDecision;
    fn on_write(&mut self) -> SeDecision;
    fn on_tick(&mut self) -> SeDecision;
    fn strength(&self) -> f64;
    fn set_replicated_here(&mut self, replicated_here: bool);
    fn params(&self) -> &StrategyParams;
}

/// The sole policy variant in this design: strength rises on access,
/// decays on tick, and drives admit/evict at the configured thresholds.
/// Thresholds are inclusive at both ends (§4.3: "If strength ==
/// repl_threshold, admit. If strength == rmv_threshold, evict").
pub struct AdaptiveDecayStrategy {
    strength: f64,
    params: StrategyParams,
    replicated_here: bool,
    initialized: bool,
}

impl AdaptiveDecayStrategy {
    pub fn new() -> Self {
        Self {
            strength: 0.0,
            params: StrategyParams::default(),
            replicated_here: false,
            initialized: false,
        }
    }

    fn clamp(&self, strength: f64) -> f64 {
        strength.clamp(0.0, self.params.max_strength)
    }
}

impl Default for AdaptiveDecayStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyHandler for AdaptiveDecayStrategy {
    fn init(&mut self, replicated_here: bool, params: StrategyParams) {
        self.replicated_here = replicated_here;
        if !self.initialized {
            self.strength = if replicated_here {
                params.repl_threshold
            } else {
                0.0
            };
            self.params = params;
            self.initialized = true;
            return;
        }
        if self.params != params {
            self.params = params;
            // Reconfiguration adjusts bounds but never resets strength
            // (resolves the "is strength reset on init" open question).
            self.strength = self.clamp(self.strength);
        }
    }

    fn on_read(&mut self) -> SeDecision {
        self.strength = self.clamp(self.strength + self.params.rstrength);
        if !self.replicated_here && self.strength >= self.params.repl_threshold {
            SeDecision::ShouldReplicate
        } else {
            SeDecision::NoChange
        }
    }

    fn on_write(&mut self) -> SeDecision {
        self.strength = self.clamp(self.strength + self.params.wstrength);
        if !self.replicated_here && self.strength >= self.params.repl_threshold {
            SeDecision::ShouldReplicate
        } else {
            SeDecision::NoChange
        }
    }

    fn on_tick(&mut self) -> SeDecision {
        self.strength = (self.strength - self.params.decay_factor).max(0.0);
        if self.replicated_here && self.strength <= self.params.rmv_threshold {
            SeDecision::ShouldEvict
        } else {
            SeDecision::NoChange
        }
    }

    fn strength(&self) -> f64 {
        self.strength
    }

    fn set_replicated_here(&mut self, replicated_here: bool) {
        self.replicated_here = replicated_here;
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }
}

fn new_handler(kind: StrategyKind) -> Box<dyn StrategyHandler> {
    match kind {
        StrategyKind::AdaptiveDecay => Box::new(AdaptiveDecayStrategy::new()),
    }
}

/// The per-key strategy state map. Conceptually one actor per key; here,
/// a `DashMap` sharding the per-key `parking_lot::Mutex` guarding the
/// boxed handler. The mutex is held only across the synchronous state
/// transition, never across an await point.
#[derive(Default)]
pub struct StrategyEngine {
    handlers: DashMap<ReplicaKey, Mutex<Box<dyn StrategyHandler>>>,
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_strategy(
        &self,
        key: &ReplicaKey,
        kind: StrategyKind,
        replicated_here: bool,
        params: StrategyParams,
    ) {
        let entry = self
            .handlers
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(new_handler(kind)));
        entry.lock().init(replicated_here, params);
    }

    pub fn local_read(&self, key: &ReplicaKey) -> SeDecision {
        self.with_handler(key, |h| h.on_read())
    }

    pub fn local_write(&self, key: &ReplicaKey) -> SeDecision {
        self.with_handler(key, |h| h.on_write())
    }

    pub fn tick(&self, key: &ReplicaKey) -> SeDecision {
        self.with_handler(key, |h| h.on_tick())
    }

    pub fn strength_of(&self, key: &ReplicaKey) -> Option<f64> {
        self.handlers.get(key).map(|h| h.lock().strength())
    }

    pub fn set_replicated_here(&self, key: &ReplicaKey, replicated_here: bool) {
        if let Some(h) = self.handlers.get(key) {
            h.lock().set_replicated_here(replicated_here);
        }
    }

    pub fn known_keys(&self) -> Vec<ReplicaKey> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    fn with_handler(&self, key: &ReplicaKey, f: impl FnOnce(&mut Box<dyn StrategyHandler>) -> SeDecision) -> SeDecision {
        match self.handlers.get(key) {
            Some(h) => f(&mut h.lock()),
            None => {
                // A key that was never locally bootstrapped decays from
                // zero; initialize lazily as remote-only so reads can
                // still accumulate pressure toward later acquisition.
                self.init_strategy(key, StrategyKind::AdaptiveDecay, false, StrategyParams::default());
                f(&mut self.handlers.get(key).unwrap().lock())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StrategyParams {
        StrategyParams {
            decay_time: std::time::Duration::from_secs(1),
            decay_factor: 50.0,
            repl_threshold: 100.0,
            rmv_threshold: 20.0,
            max_strength: 500.0,
            rstrength: 60.0,
            wstrength: 60.0,
            min_dcs_number: 1,
        }
    }

    #[test]
    fn single_read_does_not_admit_below_threshold() {
        let se = StrategyEngine::new();
        let key = ReplicaKey::from_str("k");
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params());
        assert_eq!(se.local_read(&key), SeDecision::NoChange);
        assert_eq!(se.strength_of(&key), Some(60.0));
    }

    #[test]
    fn second_read_crosses_threshold_inclusive() {
        let se = StrategyEngine::new();
        let key = ReplicaKey::from_str("k");
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params());
        se.local_read(&key);
        assert_eq!(se.local_read(&key), SeDecision::ShouldReplicate);
        assert_eq!(se.strength_of(&key), Some(120.0));
    }

    #[test]
    fn decay_to_exactly_threshold_evicts() {
        let se = StrategyEngine::new();
        let key = ReplicaKey::from_str("k");
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, true, params());
        // strength starts at repl_threshold = 100
        assert_eq!(se.tick(&key), SeDecision::NoChange); // 50
        assert_eq!(se.tick(&key), SeDecision::ShouldEvict); // 0, well below rmv
    }

    #[test]
    fn strength_never_goes_negative() {
        let se = StrategyEngine::new();
        let key = ReplicaKey::from_str("k");
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, true, params());
        for _ in 0..10 {
            se.tick(&key);
        }
        assert_eq!(se.strength_of(&key), Some(0.0));
    }

    #[test]
    fn strength_never_exceeds_max() {
        let se = StrategyEngine::new();
        let key = ReplicaKey::from_str("k");
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params());
        for _ in 0..20 {
            se.local_write(&key);
        }
        assert!(se.strength_of(&key).unwrap() <= params().max_strength);
    }

    #[test]
    fn init_strategy_is_idempotent_for_identical_params() {
        let se = StrategyEngine::new();
        let key = ReplicaKey::from_str("k");
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params());
        se.local_read(&key);
        let strength_after_read = se.strength_of(&key).unwrap();
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params());
        assert_eq!(se.strength_of(&key), Some(strength_after_read));
    }

    #[test]
    fn reconfiguring_params_does_not_reset_strength() {
        let se = StrategyEngine::new();
        let key = ReplicaKey::from_str("k");
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params());
        se.local_read(&key);
        let strength_after_read = se.strength_of(&key).unwrap();

        let mut reconfigured = params();
        reconfigured.rstrength = 10.0;
        se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, reconfigured);
        assert_eq!(se.strength_of(&key), Some(strength_after_read));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_params() -> impl Strategy<Value = StrategyParams> {
            (1.0f64..200.0, 50.0f64..300.0, 1.0f64..100.0, 300.0f64..1000.0, 1.0f64..200.0, 1.0f64..200.0).prop_map(
                |(decay_factor, repl_threshold, rmv_threshold, max_strength, rstrength, wstrength)| StrategyParams {
                    decay_time: std::time::Duration::from_secs(1),
                    decay_factor,
                    repl_threshold,
                    rmv_threshold,
                    max_strength,
                    rstrength,
                    wstrength,
                    min_dcs_number: 1,
                },
            )
        }

        proptest! {
            /// Invariant 1: strength stays within `[0, max_strength]` no
            /// matter how many reads, writes, or ticks are applied.
            #[test]
            fn strength_always_in_bounds(
                params in arb_params(),
                ops in prop::collection::vec(0u8..3, 0..200),
            ) {
                let se = StrategyEngine::new();
                let key = ReplicaKey::from_str("k");
                se.init_strategy(&key, StrategyKind::AdaptiveDecay, true, params.clone());
                for op in ops {
                    match op {
                        0 => { se.local_read(&key); }
                        1 => { se.local_write(&key); }
                        _ => { se.tick(&key); }
                    }
                    let s = se.strength_of(&key).unwrap();
                    prop_assert!(s >= 0.0);
                    prop_assert!(s <= params.max_strength);
                }
            }

            /// Open Question 2: re-running `init_strategy` with identical
            /// params is always a no-op on accumulated strength, whatever
            /// the key's current strength happens to be.
            #[test]
            fn init_strategy_identical_params_is_idempotent(
                params in arb_params(),
                reads in 0usize..20,
            ) {
                let se = StrategyEngine::new();
                let key = ReplicaKey::from_str("k");
                se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params.clone());
                for _ in 0..reads {
                    se.local_read(&key);
                }
                let before = se.strength_of(&key).unwrap();
                se.init_strategy(&key, StrategyKind::AdaptiveDecay, false, params);
                prop_assert_eq!(se.strength_of(&key), Some(before));
            }
        }
    }
}
