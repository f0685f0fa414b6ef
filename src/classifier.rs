//! State classifier - maps raw telemetry to canonical bot states
//!
//! Fail-safe by construction: a stale heartbeat always wins over whatever the
//! runner last said about itself, and an unrecognized status is an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::blocker::{sort_by_severity, Blocker, BlockerKind};
use crate::config::ClassifierConfig;
use crate::types::{EvolutionState, JobState, RunnerState, TelemetrySnapshot};

/// Classifier output for one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub runner_state: RunnerState,
    pub job_state: JobState,
    pub evolution_state: EvolutionState,
    /// Most severe first
    pub blockers: Vec<Blocker>,
}

/// Pure classifier; safe to call on every telemetry tick
#[derive(Debug, Clone)]
pub struct StateClassifier {
    config: ClassifierConfig,
}

impl StateClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a snapshot as of `now`
    pub fn classify(&self, snapshot: &TelemetrySnapshot, now: DateTime<Utc>) -> Classification {
        let mut kinds = Vec::new();

        let runner_state = self.classify_runner(snapshot, now, &mut kinds);
        let evolution_state = EvolutionState::from_raw(snapshot.evolution_status.as_deref());
        let job_state = derive_job_state(snapshot.job_status, evolution_state);

        if job_state.is_running() {
            if let Some(started_at) = snapshot.job_started_at {
                let running_secs = (now - started_at).num_seconds().max(0);
                if running_secs > self.config.job_stuck_secs {
                    kinds.push(BlockerKind::JobStuck {
                        job: job_state.as_str().to_string(),
                        running_secs,
                        threshold_secs: self.config.job_stuck_secs,
                    });
                }
            }
        }

        if evolution_state == EvolutionState::Failed {
            kinds.push(BlockerKind::EvolutionFailed);
        }

        if snapshot.consecutive_failures >= self.config.consecutive_failure_threshold {
            kinds.push(BlockerKind::RepeatedFailures {
                consecutive_failures: snapshot.consecutive_failures,
                threshold: self.config.consecutive_failure_threshold,
            });
        }

        let mut blockers: Vec<Blocker> = kinds.into_iter().map(Blocker::from).collect();
        sort_by_severity(&mut blockers);

        debug!(
            bot_id = %snapshot.bot_id,
            runner = %runner_state,
            job = job_state.as_str(),
            blockers = blockers.len(),
            "Classified bot"
        );

        Classification {
            runner_state,
            job_state,
            evolution_state,
            blockers,
        }
    }

    fn classify_runner(
        &self,
        snapshot: &TelemetrySnapshot,
        now: DateTime<Utc>,
        kinds: &mut Vec<BlockerKind>,
    ) -> RunnerState {
        let cfg = &self.config;
        let raw = snapshot
            .runner_status_raw
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let heartbeat_age = snapshot.heartbeat_age_secs(now);

        if raw.is_none() && snapshot.last_heartbeat_at.is_none() {
            kinds.push(BlockerKind::NoRunner);
            return RunnerState::NoRunner;
        }

        // The restart count is carried across cycles, so crossing the
        // threshold is detected here even if the runner claims to be fine.
        if snapshot.restart_count >= cfg.circuit_break_restart_threshold {
            warn!(
                bot_id = %snapshot.bot_id,
                restarts = snapshot.restart_count,
                "Restart threshold crossed, tripping circuit breaker"
            );
            kinds.push(BlockerKind::CircuitBreak {
                restart_count: snapshot.restart_count,
                threshold: cfg.circuit_break_restart_threshold,
            });
            return RunnerState::CircuitBreak;
        }

        let reported = raw.map(RunnerState::from_raw);

        if snapshot.in_maintenance(now) || reported == Some(Some(RunnerState::Maintenance)) {
            kinds.push(BlockerKind::Maintenance);
            return RunnerState::Maintenance;
        }

        let stale = heartbeat_age
            .map(|age| age > cfg.heartbeat_stale_secs)
            .unwrap_or(true);
        if stale {
            warn!(
                bot_id = %snapshot.bot_id,
                age_secs = ?heartbeat_age,
                reported = ?raw,
                "Heartbeat stale, classifying as STALLED"
            );
            kinds.push(BlockerKind::HeartbeatStale {
                age_secs: heartbeat_age,
                threshold_secs: cfg.heartbeat_stale_secs,
            });
            return RunnerState::Stalled;
        }

        let state = match reported {
            // Fresh heartbeat but no status yet: the runner is still booting
            None => RunnerState::Starting,
            Some(None) => RunnerState::Error,
            Some(Some(state)) => state,
        };

        match state {
            RunnerState::Error => kinds.push(BlockerKind::RunnerError {
                reported: raw.map(str::to_string),
            }),
            // Heartbeat and restart count are fine here, so only the runner's
            // own word says it is blocked
            RunnerState::Stalled
            | RunnerState::CircuitBreak
            | RunnerState::NoRunner
            | RunnerState::DataFrozen => kinds.push(BlockerKind::SelfReported { state }),
            _ => {}
        }

        if state.is_active() {
            let age = market_data_age(snapshot, now);
            let frozen = age
                .map(|age| age > cfg.market_data_stale_secs)
                .unwrap_or(true);
            if frozen {
                kinds.push(BlockerKind::DataFrozen {
                    age_secs: age,
                    threshold_secs: cfg.market_data_stale_secs,
                });
                return RunnerState::DataFrozen;
            }
        }

        state
    }
}

fn market_data_age(snapshot: &TelemetrySnapshot, now: DateTime<Utc>) -> Option<i64> {
    snapshot
        .last_market_data_at
        .map(|at| (now - at).num_seconds().max(0))
}

/// An idle job slot with an evolution run in flight is reported as evolving
fn derive_job_state(job_status: JobState, evolution: EvolutionState) -> JobState {
    if job_status == JobState::Idle && evolution == EvolutionState::Evolving {
        JobState::Evolving
    } else {
        job_status
    }
}
