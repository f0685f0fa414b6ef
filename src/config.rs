//! Engine configuration
//!
//! Thresholds and weights are passed into each component explicitly instead
//! of living in module-level tables. Defaults match the values existing
//! consumers depend on.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::ConfigError;
use crate::types::Stage;

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub health: HealthConfig,
    pub promotion: PromotionConfig,
}

impl EngineConfig {
    /// Load configuration from an optional file plus `LIFECYCLE__*` env vars.
    ///
    /// Env vars use `__` between path segments, e.g.
    /// `LIFECYCLE__CLASSIFIER__HEARTBEAT_STALE_SECS=300`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading engine config from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("LIFECYCLE").separator("__"))
            .build()?;

        let cfg: EngineConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let total = self.health.weights.total();
        if total != 100 {
            return Err(ConfigError::WeightsSum(total));
        }

        let c = &self.classifier;
        for (field, value) in [
            ("classifier.heartbeat_stale_secs", c.heartbeat_stale_secs),
            ("classifier.market_data_stale_secs", c.market_data_stale_secs),
            ("classifier.job_stuck_secs", c.job_stuck_secs),
            (
                "promotion.backtest_max_age_secs",
                self.promotion.backtest_max_age_secs,
            ),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be positive, got {}", value),
                });
            }
        }
        if c.circuit_break_restart_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "classifier.circuit_break_restart_threshold",
                reason: "must be at least 1".to_string(),
            });
        }

        let ratio = self.promotion.near_band_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "promotion.near_band_ratio",
                reason: format!("must be within (0, 1], got {}", ratio),
            });
        }
        if !(self.promotion.max_drawdown_pct > 0.0) {
            return Err(ConfigError::Invalid {
                field: "promotion.max_drawdown_pct",
                reason: format!("must be positive, got {}", self.promotion.max_drawdown_pct),
            });
        }
        Ok(())
    }
}

/// State classifier thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Heartbeat age after which a runner is considered stalled
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: i64,
    /// Market data age after which an active runner is considered frozen
    #[serde(default = "default_market_data_stale_secs")]
    pub market_data_stale_secs: i64,
    /// Restart count at which the runner trips the circuit breaker
    #[serde(default = "default_circuit_break_restart_threshold")]
    pub circuit_break_restart_threshold: u32,
    #[serde(default = "default_consecutive_failure_threshold")]
    pub consecutive_failure_threshold: u32,
    /// Running-job age after which the job is reported as stuck
    #[serde(default = "default_job_stuck_secs")]
    pub job_stuck_secs: i64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            market_data_stale_secs: default_market_data_stale_secs(),
            circuit_break_restart_threshold: default_circuit_break_restart_threshold(),
            consecutive_failure_threshold: default_consecutive_failure_threshold(),
            job_stuck_secs: default_job_stuck_secs(),
        }
    }
}

fn default_heartbeat_stale_secs() -> i64 { 120 }
fn default_market_data_stale_secs() -> i64 { 300 }
fn default_circuit_break_restart_threshold() -> u32 { 5 }
fn default_consecutive_failure_threshold() -> u32 { 3 }
fn default_job_stuck_secs() -> i64 { 6 * 3600 }

/// Health scorer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HealthConfig {
    pub weights: HealthWeights,
}

/// Component weights for the health score; must total 100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub runner_reliability: u32,
    pub backtest_success: u32,
    pub evolution_stability: u32,
    pub promotion_readiness: u32,
    pub risk_discipline: u32,
    pub error_frequency: u32,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            runner_reliability: 30,
            backtest_success: 20,
            evolution_stability: 20,
            promotion_readiness: 15,
            risk_discipline: 10,
            error_frequency: 5,
        }
    }
}

impl HealthWeights {
    /// Widened so any set of `u32` weights sums without overflow
    pub fn total(&self) -> u64 {
        [
            self.runner_reliability,
            self.backtest_success,
            self.evolution_stability,
            self.promotion_readiness,
            self.risk_discipline,
            self.error_frequency,
        ]
        .iter()
        .map(|&w| u64::from(w))
        .sum()
    }
}

/// Promotion gate configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionConfig {
    #[serde(default)]
    pub trade_thresholds: TradeThresholds,
    /// Fraction of a trade target at which a gate reports NEAR
    #[serde(default = "default_near_band_ratio")]
    pub near_band_ratio: f64,
    /// Maximum age of a successful backtest for the freshness gate
    #[serde(default = "default_backtest_max_age_secs")]
    pub backtest_max_age_secs: i64,
    /// Drawdown limit in percent
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_min_profit_factor")]
    pub min_profit_factor: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            trade_thresholds: TradeThresholds::default(),
            near_band_ratio: default_near_band_ratio(),
            backtest_max_age_secs: default_backtest_max_age_secs(),
            max_drawdown_pct: default_max_drawdown_pct(),
            min_profit_factor: default_min_profit_factor(),
        }
    }
}

fn default_near_band_ratio() -> f64 { 0.8 }
fn default_backtest_max_age_secs() -> i64 { 7 * 86_400 }
fn default_max_drawdown_pct() -> f64 { 20.0 }
fn default_min_profit_factor() -> f64 { 1.0 }

/// Minimum trades a bot must complete at a stage before it may advance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeThresholds {
    pub paper: u32,
    pub shadow: u32,
    pub canary: u32,
}

impl Default for TradeThresholds {
    fn default() -> Self {
        Self {
            paper: 30,
            shadow: 25,
            canary: 60,
        }
    }
}

impl TradeThresholds {
    /// `None` for TRIALS (no trade gate) and LIVE (terminal)
    pub fn for_stage(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::Trials | Stage::Live => None,
            Stage::Paper => Some(self.paper),
            Stage::Shadow => Some(self.shadow),
            Stage::Canary => Some(self.canary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.health.weights.total(), 100);
        assert_eq!(cfg.promotion.trade_thresholds.for_stage(Stage::Trials), None);
        assert_eq!(cfg.promotion.trade_thresholds.for_stage(Stage::Paper), Some(30));
        assert_eq!(cfg.promotion.trade_thresholds.for_stage(Stage::Shadow), Some(25));
        assert_eq!(cfg.promotion.trade_thresholds.for_stage(Stage::Canary), Some(60));
        assert_eq!(cfg.promotion.trade_thresholds.for_stage(Stage::Live), None);
        assert_eq!(cfg.classifier.heartbeat_stale_secs, 120);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let mut cfg = EngineConfig::default();
        cfg.health.weights.error_frequency = 10;
        match cfg.validate() {
            Err(ConfigError::WeightsSum(105)) => {}
            other => panic!("expected WeightsSum(105), got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_huge_weights() {
        let mut cfg = EngineConfig::default();
        cfg.health.weights.runner_reliability = u32::MAX;
        match cfg.validate() {
            Err(ConfigError::WeightsSum(total)) => {
                assert_eq!(total, u64::from(u32::MAX) + 70);
            }
            other => panic!("expected WeightsSum, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_near_band() {
        let mut cfg = EngineConfig::default();
        cfg.promotion.near_band_ratio = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "promotion.near_band_ratio",
                ..
            })
        ));
    }

    #[test]
    fn test_load_partial_yaml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "classifier:\n  heartbeat_stale_secs: 300\npromotion:\n  max_drawdown_pct: 15.0"
        )
        .unwrap();

        let cfg = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.classifier.heartbeat_stale_secs, 300);
        assert_eq!(cfg.classifier.market_data_stale_secs, 300);
        assert_eq!(cfg.promotion.max_drawdown_pct, 15.0);
        assert_eq!(cfg.promotion.trade_thresholds.paper, 30);
        assert_eq!(cfg.health.weights.runner_reliability, 30);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "health:\n  weights:\n    runner_reliability: 50").unwrap();

        assert!(matches!(
            EngineConfig::load(Some(file.path())),
            Err(ConfigError::WeightsSum(120))
        ));
    }
}
