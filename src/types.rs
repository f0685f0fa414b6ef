//! Core telemetry types
//!
//! These types define the contract between the telemetry producers and the
//! lifecycle engine. Everything here is an input; derived outputs live next
//! to the component that computes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::BrokerLink;

/// Trading-maturity stage, ordered by increasing real-money exposure
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[default]
    Trials,
    Paper,
    Shadow,
    Canary,
    Live,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Trials,
        Stage::Paper,
        Stage::Shadow,
        Stage::Canary,
        Stage::Live,
    ];

    /// Stage a bot advances to on promotion; `None` at the terminal stage
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Trials => Some(Stage::Paper),
            Stage::Paper => Some(Stage::Shadow),
            Stage::Shadow => Some(Stage::Canary),
            Stage::Canary => Some(Stage::Live),
            Stage::Live => None,
        }
    }

    /// Stage a bot falls back to on a one-step demotion
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Stage::Trials => None,
            Stage::Paper => Some(Stage::Trials),
            Stage::Shadow => Some(Stage::Paper),
            Stage::Canary => Some(Stage::Shadow),
            Stage::Live => Some(Stage::Canary),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Trials => "TRIALS",
            Stage::Paper => "PAPER",
            Stage::Shadow => "SHADOW",
            Stage::Canary => "CANARY",
            Stage::Live => "LIVE",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerState {
    Scanning,
    Signal,
    Trading,
    Starting,
    Stalled,
    Error,
    DataFrozen,
    Maintenance,
    Paused,
    Restarting,
    CircuitBreak,
    Stopped,
    NoRunner,
}

impl RunnerState {
    /// Map a self-reported runner status to a variant.
    ///
    /// Returns `None` for statuses the engine does not recognize.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(&['-', ' '][..], "_");
        let state = match normalized.as_str() {
            "scanning" | "running" | "idle" | "ok" => RunnerState::Scanning,
            "signal" | "signal_detected" => RunnerState::Signal,
            "trading" | "in_trade" | "executing" => RunnerState::Trading,
            "starting" | "booting" | "initializing" => RunnerState::Starting,
            "stalled" => RunnerState::Stalled,
            "error" | "failed" | "crashed" => RunnerState::Error,
            "data_frozen" | "frozen" => RunnerState::DataFrozen,
            "maintenance" => RunnerState::Maintenance,
            "paused" => RunnerState::Paused,
            "restarting" => RunnerState::Restarting,
            "circuit_break" | "circuit_breaker" | "circuit_open" => RunnerState::CircuitBreak,
            "stopped" | "terminated" => RunnerState::Stopped,
            "no_runner" | "none" => RunnerState::NoRunner,
            _ => return None,
        };
        Some(state)
    }

    /// Runner is alive and consuming market data
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunnerState::Scanning | RunnerState::Signal | RunnerState::Trading
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Scanning => "SCANNING",
            RunnerState::Signal => "SIGNAL",
            RunnerState::Trading => "TRADING",
            RunnerState::Starting => "STARTING",
            RunnerState::Stalled => "STALLED",
            RunnerState::Error => "ERROR",
            RunnerState::DataFrozen => "DATA_FROZEN",
            RunnerState::Maintenance => "MAINTENANCE",
            RunnerState::Paused => "PAUSED",
            RunnerState::Restarting => "RESTARTING",
            RunnerState::CircuitBreak => "CIRCUIT_BREAK",
            RunnerState::Stopped => "STOPPED",
            RunnerState::NoRunner => "NO_RUNNER",
        }
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backtest / evolution job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Idle,
    BacktestRunning,
    BacktestQueued,
    Evolving,
    Evaluating,
    Queued,
}

impl JobState {
    /// Job is actively consuming compute (as opposed to waiting in a queue)
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobState::BacktestRunning | JobState::Evolving | JobState::Evaluating
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "IDLE",
            JobState::BacktestRunning => "BACKTEST_RUNNING",
            JobState::BacktestQueued => "BACKTEST_QUEUED",
            JobState::Evolving => "EVOLVING",
            JobState::Evaluating => "EVALUATING",
            JobState::Queued => "QUEUED",
        }
    }
}

/// Strategy evolution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvolutionState {
    #[default]
    Idle,
    Evolving,
    Completed,
    Paused,
    Failed,
}

impl EvolutionState {
    /// Parse the raw evolution status; anything unrecognized is `Idle`
    pub fn from_raw(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return EvolutionState::Idle;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "evolving" | "running" | "in_progress" => EvolutionState::Evolving,
            "completed" | "complete" | "converged" | "done" => EvolutionState::Completed,
            "paused" => EvolutionState::Paused,
            "failed" | "error" => EvolutionState::Failed,
            _ => EvolutionState::Idle,
        }
    }
}

/// Rollup performance metrics for the bot's current stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupMetrics {
    pub trades: u32,
    /// Fraction of winning trades (0.0 - 1.0)
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    /// Peak-to-trough drawdown in percent (e.g. 12.5 for 12.5%)
    pub max_drawdown_pct: f64,
    /// Average PnL per trade in USD
    pub expectancy: f64,
    pub last_trade_at: Option<DateTime<Utc>>,
}

/// Scheduled maintenance window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl MaintenanceWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }
}

/// Most recent backtest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub completed_at: DateTime<Utc>,
    pub succeeded: bool,
}

impl BacktestRun {
    /// Age of the run in seconds at `now` (never negative)
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.completed_at).num_seconds().max(0)
    }
}

/// Last-known telemetry for one bot, produced once per evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub bot_id: Uuid,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Status string as reported by the runner itself
    #[serde(default)]
    pub runner_status_raw: Option<String>,
    #[serde(default)]
    pub job_status: JobState,
    #[serde(default)]
    pub job_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evolution_status: Option<String>,
    #[serde(default)]
    pub rollup_metrics: RollupMetrics,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Restarts since the circuit breaker was last reset
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub maintenance_window: Option<MaintenanceWindow>,
    #[serde(default)]
    pub last_market_data_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_backtest: Option<BacktestRun>,
    /// Errors reported in the current rollup window
    #[serde(default)]
    pub recent_error_count: u32,
    #[serde(default)]
    pub broker: Option<BrokerLink>,
}

impl TelemetrySnapshot {
    /// Minimal snapshot for a bot with no telemetry yet
    pub fn new(bot_id: Uuid, stage: Stage) -> Self {
        Self {
            bot_id,
            stage,
            last_heartbeat_at: None,
            runner_status_raw: None,
            job_status: JobState::Idle,
            job_started_at: None,
            evolution_status: None,
            rollup_metrics: RollupMetrics::default(),
            consecutive_failures: 0,
            restart_count: 0,
            maintenance_window: None,
            last_market_data_at: None,
            last_backtest: None,
            recent_error_count: 0,
            broker: None,
        }
    }

    /// Seconds since the last heartbeat, `None` if the runner never reported
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_heartbeat_at
            .map(|at| (now - at).num_seconds().max(0))
    }

    pub fn in_maintenance(&self, now: DateTime<Utc>) -> bool {
        self.maintenance_window
            .map(|w| w.contains(now))
            .unwrap_or(false)
    }
}
