//! Blockers - reported reasons an operation cannot proceed

use serde::{Deserialize, Serialize};

use crate::promotion::GateCode;
use crate::types::RunnerState;

/// Blocker severity, ordered `Info < Warning < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Category tag used to group blockers for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerCategory {
    Eligibility,
    Data,
    Risk,
    Performance,
    Capital,
}

/// What is blocking, with the fields each kind needs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockerKind {
    /// No runner has ever reported for this bot
    NoRunner,
    /// Heartbeat missing or older than the staleness threshold
    HeartbeatStale { age_secs: Option<i64>, threshold_secs: i64 },
    /// Runner reports an error, or a status the engine does not recognize
    RunnerError { reported: Option<String> },
    /// Restart count crossed the circuit-break threshold
    CircuitBreak { restart_count: u32, threshold: u32 },
    /// Runner put itself in a blocking state the engine did not observe
    /// directly (e.g. reports `stalled` while its heartbeat is fresh)
    SelfReported { state: RunnerState },
    /// Runner is alive but market data stopped updating
    DataFrozen { age_secs: Option<i64>, threshold_secs: i64 },
    /// Inside a scheduled maintenance window
    Maintenance,
    RepeatedFailures { consecutive_failures: u32, threshold: u32 },
    JobStuck { job: String, running_secs: i64, threshold_secs: i64 },
    EvolutionFailed,
    /// Account balance at or below zero
    AccountBlown { balance: String },
    /// A promotion gate did not pass
    GateFailed {
        gate: GateCode,
        severity: Severity,
        detail: String,
    },
}

impl BlockerKind {
    pub fn code(&self) -> &'static str {
        match self {
            BlockerKind::NoRunner => "NO_RUNNER",
            BlockerKind::HeartbeatStale { .. } => "HEARTBEAT_STALE",
            BlockerKind::RunnerError { .. } => "RUNNER_ERROR",
            BlockerKind::CircuitBreak { .. } => "CIRCUIT_BREAK",
            BlockerKind::SelfReported { state } => reported_as(*state).code(),
            BlockerKind::DataFrozen { .. } => "DATA_FROZEN",
            BlockerKind::Maintenance => "MAINTENANCE_WINDOW",
            BlockerKind::RepeatedFailures { .. } => "REPEATED_FAILURES",
            BlockerKind::JobStuck { .. } => "JOB_STUCK",
            BlockerKind::EvolutionFailed => "EVOLUTION_FAILED",
            BlockerKind::AccountBlown { .. } => "ACCOUNT_BLOWN",
            BlockerKind::GateFailed { gate, .. } => gate.blocker_code(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            BlockerKind::HeartbeatStale { .. }
            | BlockerKind::RunnerError { .. }
            | BlockerKind::CircuitBreak { .. }
            | BlockerKind::AccountBlown { .. } => Severity::Critical,
            BlockerKind::NoRunner
            | BlockerKind::DataFrozen { .. }
            | BlockerKind::RepeatedFailures { .. }
            | BlockerKind::JobStuck { .. }
            | BlockerKind::EvolutionFailed => Severity::Warning,
            BlockerKind::Maintenance => Severity::Info,
            BlockerKind::GateFailed { severity, .. } => *severity,
            BlockerKind::SelfReported { state } => reported_as(*state).severity(),
        }
    }

    pub fn category(&self) -> BlockerCategory {
        match self {
            BlockerKind::NoRunner
            | BlockerKind::RunnerError { .. }
            | BlockerKind::Maintenance
            | BlockerKind::RepeatedFailures { .. } => BlockerCategory::Eligibility,
            BlockerKind::HeartbeatStale { .. }
            | BlockerKind::DataFrozen { .. }
            | BlockerKind::JobStuck { .. } => BlockerCategory::Data,
            BlockerKind::CircuitBreak { .. } => BlockerCategory::Risk,
            BlockerKind::EvolutionFailed => BlockerCategory::Performance,
            BlockerKind::AccountBlown { .. } => BlockerCategory::Capital,
            BlockerKind::GateFailed { gate, .. } => gate.category(),
            BlockerKind::SelfReported { state } => reported_as(*state).category(),
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            BlockerKind::NoRunner => "Deploy a runner for this bot",
            BlockerKind::HeartbeatStale { .. } => "Restart the runner and confirm heartbeats resume",
            BlockerKind::RunnerError { .. } => "Inspect the runner logs, fix the fault and restart",
            BlockerKind::CircuitBreak { .. } => {
                "Investigate the restart loop, then reset the circuit breaker"
            }
            BlockerKind::DataFrozen { .. } => "Check the market data feed connection",
            BlockerKind::Maintenance => "Wait for the maintenance window to end",
            BlockerKind::RepeatedFailures { .. } => "Review recent failures in the audit log",
            BlockerKind::JobStuck { .. } => "Cancel and requeue the job",
            BlockerKind::EvolutionFailed => "Review the evolution run and retry",
            BlockerKind::AccountBlown { .. } => "Fund the account before trading resumes",
            BlockerKind::GateFailed { gate, .. } => gate.remediation(),
            BlockerKind::SelfReported { state } => reported_as(*state).suggested_action(),
        }
    }

    /// An external recovery loop is known to handle this kind
    pub fn auto_healable(&self) -> bool {
        matches!(
            self,
            BlockerKind::HeartbeatStale { .. }
                | BlockerKind::DataFrozen { .. }
                | BlockerKind::JobStuck { .. }
        )
    }

    /// Severe enough to force a bot straight back to TRIALS
    pub fn is_safety_critical(&self) -> bool {
        matches!(self, BlockerKind::AccountBlown { .. })
    }

    pub fn message(&self) -> String {
        match self {
            BlockerKind::NoRunner => "No runner has reported for this bot".to_string(),
            BlockerKind::HeartbeatStale {
                age_secs: Some(age),
                threshold_secs,
            } => format!(
                "Last heartbeat {}s ago exceeds the {}s staleness threshold",
                age, threshold_secs
            ),
            BlockerKind::HeartbeatStale { age_secs: None, .. } => {
                "Runner has never sent a heartbeat".to_string()
            }
            BlockerKind::RunnerError {
                reported: Some(status),
            } => format!("Runner reported status '{}'", status),
            BlockerKind::RunnerError { reported: None } => "Runner is in an error state".to_string(),
            BlockerKind::CircuitBreak {
                restart_count,
                threshold,
            } => format!(
                "Runner restarted {} times (circuit breaks at {})",
                restart_count, threshold
            ),
            BlockerKind::SelfReported { state } => format!("Runner reports itself as {}", state),
            BlockerKind::DataFrozen {
                age_secs: Some(age),
                threshold_secs,
            } => format!(
                "Market data last updated {}s ago (limit {}s)",
                age, threshold_secs
            ),
            BlockerKind::DataFrozen { age_secs: None, .. } => {
                "Runner is active but has never received market data".to_string()
            }
            BlockerKind::Maintenance => "Bot is inside a scheduled maintenance window".to_string(),
            BlockerKind::RepeatedFailures {
                consecutive_failures,
                threshold,
            } => format!(
                "{} consecutive failures (warning at {})",
                consecutive_failures, threshold
            ),
            BlockerKind::JobStuck {
                job,
                running_secs,
                threshold_secs,
            } => format!(
                "{} job running for {}s (limit {}s)",
                job, running_secs, threshold_secs
            ),
            BlockerKind::EvolutionFailed => "Last strategy evolution run failed".to_string(),
            BlockerKind::AccountBlown { balance } => {
                format!("Account blown: balance is {}", balance)
            }
            BlockerKind::GateFailed { gate, detail, .. } => {
                format!("{}: {}", gate.label(), detail)
            }
        }
    }
}

/// Kind whose code, severity and remediation a self-reported state borrows
fn reported_as(state: RunnerState) -> BlockerKind {
    match state {
        RunnerState::Stalled => BlockerKind::HeartbeatStale {
            age_secs: None,
            threshold_secs: 0,
        },
        RunnerState::CircuitBreak => BlockerKind::CircuitBreak {
            restart_count: 0,
            threshold: 0,
        },
        RunnerState::NoRunner => BlockerKind::NoRunner,
        RunnerState::DataFrozen => BlockerKind::DataFrozen {
            age_secs: None,
            threshold_secs: 0,
        },
        _ => BlockerKind::RunnerError { reported: None },
    }
}

/// Flattened blocker as handed to collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Blocker {
    pub code: &'static str,
    pub severity: Severity,
    pub category: BlockerCategory,
    pub message: String,
    pub suggested_action: &'static str,
    pub auto_healable: bool,
    pub detail: BlockerKind,
}

impl From<BlockerKind> for Blocker {
    fn from(kind: BlockerKind) -> Self {
        Self {
            code: kind.code(),
            severity: kind.severity(),
            category: kind.category(),
            message: kind.message(),
            suggested_action: kind.suggested_action(),
            auto_healable: kind.auto_healable(),
            detail: kind,
        }
    }
}

impl Blocker {
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

pub fn has_critical(blockers: &[Blocker]) -> bool {
    blockers.iter().any(Blocker::is_critical)
}

pub fn highest_severity(blockers: &[Blocker]) -> Option<Severity> {
    blockers.iter().map(|b| b.severity).max()
}

/// Most severe first; insertion order is kept within a severity
pub fn sort_by_severity(blockers: &mut [Blocker]) {
    blockers.sort_by(|a, b| b.severity.cmp(&a.severity));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_kind_fields_flow_into_blocker() {
        let blocker = Blocker::from(BlockerKind::HeartbeatStale {
            age_secs: Some(600),
            threshold_secs: 120,
        });
        assert_eq!(blocker.code, "HEARTBEAT_STALE");
        assert_eq!(blocker.severity, Severity::Critical);
        assert_eq!(blocker.category, BlockerCategory::Data);
        assert!(blocker.auto_healable);
        assert!(blocker.message.contains("600s"));
    }

    #[test]
    fn test_sort_and_summaries() {
        let mut blockers: Vec<Blocker> = vec![
            BlockerKind::Maintenance.into(),
            BlockerKind::EvolutionFailed.into(),
            BlockerKind::CircuitBreak {
                restart_count: 6,
                threshold: 5,
            }
            .into(),
        ];
        assert!(has_critical(&blockers));
        assert_eq!(highest_severity(&blockers), Some(Severity::Critical));

        sort_by_severity(&mut blockers);
        let codes: Vec<_> = blockers.iter().map(|b| b.code).collect();
        assert_eq!(codes, vec!["CIRCUIT_BREAK", "EVOLUTION_FAILED", "MAINTENANCE_WINDOW"]);

        assert_eq!(highest_severity(&[]), None);
    }

    #[test]
    fn test_self_reported_state_keeps_code_with_own_message() {
        let blocker = Blocker::from(BlockerKind::SelfReported {
            state: RunnerState::CircuitBreak,
        });
        assert_eq!(blocker.code, "CIRCUIT_BREAK");
        assert_eq!(blocker.severity, Severity::Critical);
        assert_eq!(blocker.category, BlockerCategory::Risk);
        assert_eq!(blocker.message, "Runner reports itself as CIRCUIT_BREAK");
        assert!(!blocker.auto_healable);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let blocker = Blocker::from(BlockerKind::NoRunner);
        let json = serde_json::to_value(&blocker).unwrap();
        assert_eq!(json["code"], "NO_RUNNER");
        assert_eq!(json["severity"], "WARNING");
        assert_eq!(json["category"], "eligibility");
        assert_eq!(json["detail"]["kind"], "no_runner");
    }
}
