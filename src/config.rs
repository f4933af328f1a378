//! Layered configuration: a TOML file on disk, overridable by CLI flags
//! (§6).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DcId, StrategyParams};
use crate::error::{ControllerError, Result};
use crate::interdc::RpcTimeouts;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub dc_id: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub strategy: StrategyParamsConfig,
    #[serde(default)]
    pub rpc: RpcTimeoutsConfig,
}

/// Mirrors `StrategyParams` field-for-field but with plain seconds
/// instead of `Duration`, which TOML has no native representation for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParamsConfig {
    pub decay_time_secs: u64,
    pub decay_factor: f64,
    pub repl_threshold: f64,
    pub rmv_threshold: f64,
    pub max_strength: f64,
    pub rstrength: f64,
    pub wstrength: f64,
    pub min_dcs_number: usize,
}

impl Default for StrategyParamsConfig {
    fn default() -> Self {
        let defaults = StrategyParams::default();
        Self {
            decay_time_secs: defaults.decay_time.as_secs(),
            decay_factor: defaults.decay_factor,
            repl_threshold: defaults.repl_threshold,
            rmv_threshold: defaults.rmv_threshold,
            max_strength: defaults.max_strength,
            rstrength: defaults.rstrength,
            wstrength: defaults.wstrength,
            min_dcs_number: defaults.min_dcs_number,
        }
    }
}

impl From<StrategyParamsConfig> for StrategyParams {
    fn from(c: StrategyParamsConfig) -> Self {
        Self {
            decay_time: Duration::from_secs(c.decay_time_secs),
            decay_factor: c.decay_factor,
            repl_threshold: c.repl_threshold,
            rmv_threshold: c.rmv_threshold,
            max_strength: c.max_strength,
            rstrength: c.rstrength,
            wstrength: c.wstrength,
            min_dcs_number: c.min_dcs_number,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTimeoutsConfig {
    pub query_millis: u64,
    pub mutating_millis: u64,
}

impl Default for RpcTimeoutsConfig {
    fn default() -> Self {
        let defaults = RpcTimeouts::default();
        Self {
            query_millis: defaults.query.as_millis() as u64,
            mutating_millis: defaults.mutating.as_millis() as u64,
        }
    }
}

impl From<RpcTimeoutsConfig> for RpcTimeouts {
    fn from(c: RpcTimeoutsConfig) -> Self {
        Self {
            query: Duration::from_millis(c.query_millis),
            mutating: Duration::from_millis(c.mutating_millis),
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::BackendError(format!("reading {}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| ControllerError::BackendError(format!("parsing {}: {}", path.display(), e)))
    }

    pub fn peer_dcs(&self) -> Vec<DcId> {
        self.peers.iter().cloned().map(DcId::new).collect()
    }

    pub fn strategy_params(&self) -> StrategyParams {
        self.strategy.clone().into()
    }

    pub fn rpc_timeouts(&self) -> RpcTimeouts {
        self.rpc.clone().into()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            dc_id: "dc-1".to_string(),
            peers: Vec::new(),
            strategy: StrategyParamsConfig::default(),
            rpc: RpcTimeoutsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml_src = r#"
            dc_id = "dc-east"
            peers = ["dc-west", "dc-north"]
        "#;
        let cfg: ControllerConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.dc_id, "dc-east");
        assert_eq!(cfg.peer_dcs(), vec![DcId::new("dc-west"), DcId::new("dc-north")]);
        assert_eq!(cfg.strategy_params().repl_threshold, StrategyParams::default().repl_threshold);
    }

    #[test]
    fn parses_full_override() {
        let toml_src = r#"
            dc_id = "dc-east"
            peers = []

            [strategy]
            decay_time_secs = 5
            decay_factor = 15.0
            repl_threshold = 80.0
            rmv_threshold = 10.0
            max_strength = 300.0
            rstrength = 40.0
            wstrength = 40.0
            min_dcs_number = 2

            [rpc]
            query_millis = 500
            mutating_millis = 2000
        "#;
        let cfg: ControllerConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.strategy_params().min_dcs_number, 2);
        assert_eq!(cfg.rpc_timeouts().query.as_millis(), 500);
    }
}
