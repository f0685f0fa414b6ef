//! Error types for the lifecycle engine
//!
//! Input validation failures and configuration problems are errors. Policy
//! blocks (a gate fails, a risk cap is zero) are normal results, never errors.

use rust_decimal::Decimal;

use crate::promotion::GateCode;
use crate::types::Stage;

/// Sizing inputs that cannot produce a meaningful answer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizingError {
    #[error("stop distance is required to size a position")]
    MissingStopDistance,

    #[error("stop distance must be greater than zero ticks")]
    ZeroStopDistance,

    #[error("tick value cannot be negative: {0}")]
    NegativeTickValue(Decimal),

    #[error("risk percent must be within (0, 1], got {0}")]
    InvalidRiskPercent(Decimal),

    #[error("equity cannot be negative on a funded account: {0}")]
    NegativeEquity(Decimal),

    #[error("{0} is outside the representable decimal range")]
    Overflow(&'static str),
}

/// Reasons a promotion request is refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PromotionError {
    #[error("{0} is the terminal stage")]
    TerminalStage(Stage),

    #[error("promotion from {stage} blocked by failing gates: {}", join_gates(.gates))]
    Blocked { stage: Stage, gates: Vec<GateCode> },

    #[error("warning gates need operator acknowledgement: {}", join_gates(.gates))]
    Unacknowledged { gates: Vec<GateCode> },

    #[error("evaluation is {age_secs}s old (max {max_age_secs}s), re-evaluate first")]
    StaleEvaluation { age_secs: i64, max_age_secs: i64 },
}

fn join_gates(gates: &[GateCode]) -> String {
    gates
        .iter()
        .map(|g| g.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("health weights must sum to 100, got {0}")]
    WeightsSum(u64),

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PromotionError::Blocked {
            stage: Stage::Paper,
            gates: vec![GateCode::MinTrades, GateCode::HealthTier],
        };
        assert_eq!(
            err.to_string(),
            "promotion from PAPER blocked by failing gates: min_trades, health_tier"
        );

        let err = SizingError::InvalidRiskPercent(Decimal::from(2));
        assert_eq!(err.to_string(), "risk percent must be within (0, 1], got 2");
    }
}
