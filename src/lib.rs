//! Bot Lifecycle Library
//!
//! Deterministic risk and promotion engine for trading bots: classifies
//! runner telemetry, scores health, gates stage promotion and demotion, and
//! sizes positions against account risk limits.

pub mod blocker;
pub mod broker;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod health;
pub mod promotion;
pub mod sizing;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types for convenience
pub use blocker::{Blocker, BlockerCategory, BlockerKind, Severity};
pub use broker::{BrokerLink, BrokerVerification, SignalAgreement};
pub use classifier::{Classification, StateClassifier};
pub use config::{ClassifierConfig, EngineConfig, HealthConfig, HealthWeights, PromotionConfig};
pub use engine::{BotEvaluation, CanonicalBotState, LifecycleEngine};
pub use error::{ConfigError, PromotionError, SizingError};
pub use fleet::{evaluate_fleet, FleetEntry};
pub use health::{display_health_state, HealthScore, HealthScorer, HealthState};
pub use promotion::{
    promote, Cta, CtaAction, DemotionDecision, GateCode, GateResult, GateSeverity, GateStatus,
    PromotionEngine, PromotionEvaluation, PromotionInput,
};
pub use sizing::{
    size, size_for_bot, AccountSnapshot, BotRiskConfig, Instrument, OpenExposure,
    RiskTierConfig, SizingCap, SizingRequest, SizingResult,
};
pub use types::{
    BacktestRun, EvolutionState, JobState, MaintenanceWindow, RollupMetrics, RunnerState, Stage,
    TelemetrySnapshot,
};
