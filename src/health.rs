//! Health scoring
//!
//! Weighted sum of six clamped component scores. The display state is a
//! separate lookup over `(score, blockers)` so that a numerically healthy bot
//! with a critical blocker never reads as plain OK.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blocker::{has_critical, Blocker};
use crate::classifier::Classification;
use crate::config::{EngineConfig, HealthWeights, TradeThresholds};
use crate::types::{EvolutionState, RunnerState, TelemetrySnapshot};

/// Score at or above which a bot is OK (or BLOCKED with a critical blocker)
pub const OK_THRESHOLD: u8 = 80;
/// Score at or above which a bot is WARN rather than DEGRADED
pub const WARN_THRESHOLD: u8 = 60;

/// Discrete health tier shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Ok,
    Blocked,
    Warn,
    Degraded,
}

impl HealthState {
    /// Tiers that disqualify a bot from promotion
    pub fn is_disqualifying(&self) -> bool {
        matches!(self, HealthState::Blocked | HealthState::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Ok => "OK",
            HealthState::Blocked => "BLOCKED",
            HealthState::Warn => "WARN",
            HealthState::Degraded => "DEGRADED",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map a score and critical-blocker flag to a display tier
pub fn display_health_state(score: u8, has_critical_blocker: bool) -> HealthState {
    if score >= OK_THRESHOLD {
        if has_critical_blocker {
            HealthState::Blocked
        } else {
            HealthState::Ok
        }
    } else if score >= WARN_THRESHOLD {
        HealthState::Warn
    } else {
        HealthState::Degraded
    }
}

/// Convenience over a blocker list
pub fn health_state_for(score: u8, blockers: &[Blocker]) -> HealthState {
    display_health_state(score, has_critical(blockers))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthComponent {
    RunnerReliability,
    BacktestSuccess,
    EvolutionStability,
    PromotionReadiness,
    RiskDiscipline,
    ErrorFrequency,
}

impl HealthComponent {
    pub fn label(&self) -> &'static str {
        match self {
            HealthComponent::RunnerReliability => "runner reliability",
            HealthComponent::BacktestSuccess => "backtest success",
            HealthComponent::EvolutionStability => "evolution stability",
            HealthComponent::PromotionReadiness => "promotion readiness",
            HealthComponent::RiskDiscipline => "risk discipline",
            HealthComponent::ErrorFrequency => "error frequency",
        }
    }
}

/// Raw component scores, each expected in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub runner_reliability: f64,
    pub backtest_success: f64,
    pub evolution_stability: f64,
    pub promotion_readiness: f64,
    pub risk_discipline: f64,
    pub error_frequency: f64,
}

impl SubScores {
    fn weighted(&self, weights: &HealthWeights) -> [(HealthComponent, f64, u32); 6] {
        [
            (
                HealthComponent::RunnerReliability,
                self.runner_reliability,
                weights.runner_reliability,
            ),
            (
                HealthComponent::BacktestSuccess,
                self.backtest_success,
                weights.backtest_success,
            ),
            (
                HealthComponent::EvolutionStability,
                self.evolution_stability,
                weights.evolution_stability,
            ),
            (
                HealthComponent::PromotionReadiness,
                self.promotion_readiness,
                weights.promotion_readiness,
            ),
            (
                HealthComponent::RiskDiscipline,
                self.risk_discipline,
                weights.risk_discipline,
            ),
            (
                HealthComponent::ErrorFrequency,
                self.error_frequency,
                weights.error_frequency,
            ),
        ]
    }
}

/// NaN counts as zero
fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Weighted aggregate of clamped sub-scores.
///
/// With weights totalling 100 the result is always within [0, 100].
pub fn weighted_score(weights: &HealthWeights, sub_scores: &SubScores) -> f64 {
    sub_scores
        .weighted(weights)
        .iter()
        .map(|(_, score, weight)| clamp_score(*score) * f64::from(*weight) / 100.0)
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentScore {
    pub component: HealthComponent,
    pub score: f64,
    pub weight: u32,
}

/// Scorer output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub score: u8,
    pub reason: String,
    pub components: Vec<ComponentScore>,
}

/// Reduces a snapshot and its classification to a 0-100 score
#[derive(Debug, Clone)]
pub struct HealthScorer {
    weights: HealthWeights,
    trade_thresholds: TradeThresholds,
    backtest_max_age_secs: i64,
    drawdown_limit_pct: f64,
}

impl HealthScorer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            weights: config.health.weights,
            trade_thresholds: config.promotion.trade_thresholds,
            backtest_max_age_secs: config.promotion.backtest_max_age_secs,
            drawdown_limit_pct: config.promotion.max_drawdown_pct,
        }
    }

    pub fn score(
        &self,
        snapshot: &TelemetrySnapshot,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> HealthScore {
        let sub_scores = self.sub_scores(snapshot, classification, now);
        let aggregate = weighted_score(&self.weights, &sub_scores);
        // Weights total 100, so the aggregate already fits; round for display.
        let score = aggregate.round() as u8;

        let components: Vec<ComponentScore> = sub_scores
            .weighted(&self.weights)
            .iter()
            .map(|(component, score, weight)| ComponentScore {
                component: *component,
                score: clamp_score(*score),
                weight: *weight,
            })
            .collect();

        HealthScore {
            score,
            reason: health_reason(&components),
            components,
        }
    }

    pub fn sub_scores(
        &self,
        snapshot: &TelemetrySnapshot,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> SubScores {
        let restart_penalty = 10.0 * f64::from(snapshot.restart_count);
        let runner_reliability =
            clamp_score(runner_base_score(classification.runner_state) - restart_penalty);

        let backtest_success = match snapshot.last_backtest {
            None => 50.0,
            Some(run) if !run.succeeded => 20.0,
            Some(run) if run.age_secs(now) <= self.backtest_max_age_secs => 100.0,
            Some(_) => 70.0,
        };

        let evolution_stability = match classification.evolution_state {
            EvolutionState::Idle | EvolutionState::Completed => 100.0,
            EvolutionState::Evolving => 80.0,
            EvolutionState::Paused => 60.0,
            EvolutionState::Failed => 20.0,
        };

        let promotion_readiness = match self.trade_thresholds.for_stage(snapshot.stage) {
            Some(threshold) if threshold > 0 => clamp_score(
                100.0 * f64::from(snapshot.rollup_metrics.trades) / f64::from(threshold),
            ),
            _ => 100.0,
        };

        let drawdown = snapshot.rollup_metrics.max_drawdown_pct.abs();
        let risk_discipline =
            clamp_score(100.0 * (1.0 - drawdown / (2.0 * self.drawdown_limit_pct)));

        let error_frequency = clamp_score(
            100.0
                - 20.0 * f64::from(snapshot.consecutive_failures)
                - 5.0 * f64::from(snapshot.recent_error_count),
        );

        SubScores {
            runner_reliability,
            backtest_success,
            evolution_stability,
            promotion_readiness,
            risk_discipline,
            error_frequency,
        }
    }
}

fn runner_base_score(state: RunnerState) -> f64 {
    match state {
        RunnerState::Scanning | RunnerState::Signal | RunnerState::Trading => 100.0,
        RunnerState::Starting => 75.0,
        RunnerState::Maintenance => 70.0,
        RunnerState::Paused => 60.0,
        RunnerState::Restarting => 40.0,
        RunnerState::DataFrozen => 35.0,
        RunnerState::Stopped => 25.0,
        RunnerState::Stalled => 10.0,
        RunnerState::Error | RunnerState::CircuitBreak | RunnerState::NoRunner => 0.0,
    }
}

/// Names the two weakest components below the OK line
fn health_reason(components: &[ComponentScore]) -> String {
    let mut weak: Vec<&ComponentScore> = components
        .iter()
        .filter(|c| c.score < f64::from(OK_THRESHOLD))
        .collect();
    if weak.is_empty() {
        return "All health components nominal".to_string();
    }
    weak.sort_by(|a, b| a.score.total_cmp(&b.score));
    weak.iter()
        .take(2)
        .map(|c| format!("{} {:.0}/100", c.component.label(), c.score))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::BlockerKind;
    use crate::classifier::StateClassifier;
    use crate::types::{BacktestRun, Stage};
    use chrono::Duration;
    use uuid::Uuid;

    fn healthy_snapshot(now: DateTime<Utc>) -> TelemetrySnapshot {
        let mut s = TelemetrySnapshot::new(Uuid::new_v4(), Stage::Paper);
        s.runner_status_raw = Some("trading".to_string());
        s.last_heartbeat_at = Some(now - Duration::seconds(5));
        s.last_market_data_at = Some(now - Duration::seconds(5));
        s.last_backtest = Some(BacktestRun {
            completed_at: now - Duration::days(1),
            succeeded: true,
        });
        s.rollup_metrics.trades = 40;
        s.rollup_metrics.max_drawdown_pct = 0.0;
        s
    }

    fn score_of(s: &TelemetrySnapshot, now: DateTime<Utc>) -> HealthScore {
        let cfg = EngineConfig::default();
        let classification = StateClassifier::new(cfg.classifier).classify(s, now);
        HealthScorer::new(&cfg).score(s, &classification, now)
    }

    #[test]
    fn test_display_state_lookup() {
        assert_eq!(display_health_state(95, false), HealthState::Ok);
        assert_eq!(display_health_state(80, false), HealthState::Ok);
        assert_eq!(display_health_state(80, true), HealthState::Blocked);
        assert_eq!(display_health_state(100, true), HealthState::Blocked);
        assert_eq!(display_health_state(79, false), HealthState::Warn);
        assert_eq!(display_health_state(60, true), HealthState::Warn);
        assert_eq!(display_health_state(59, false), HealthState::Degraded);
        assert_eq!(display_health_state(0, false), HealthState::Degraded);
    }

    #[test]
    fn test_health_state_for_blockers() {
        let critical: Vec<Blocker> = vec![BlockerKind::RunnerError { reported: None }.into()];
        let info: Vec<Blocker> = vec![BlockerKind::Maintenance.into()];
        assert_eq!(health_state_for(90, &critical), HealthState::Blocked);
        assert_eq!(health_state_for(90, &info), HealthState::Ok);
    }

    #[test]
    fn test_weighted_score_examples() {
        let weights = HealthWeights::default();
        let all = |v: f64| SubScores {
            runner_reliability: v,
            backtest_success: v,
            evolution_stability: v,
            promotion_readiness: v,
            risk_discipline: v,
            error_frequency: v,
        };
        assert_eq!(weighted_score(&weights, &all(100.0)), 100.0);
        assert_eq!(weighted_score(&weights, &all(0.0)), 0.0);
        assert!((weighted_score(&weights, &all(50.0)) - 50.0).abs() < 1e-9);

        // Out-of-range inputs are clamped before weighting
        assert_eq!(weighted_score(&weights, &all(250.0)), 100.0);
        assert_eq!(weighted_score(&weights, &all(-40.0)), 0.0);
        assert_eq!(weighted_score(&weights, &all(f64::NAN)), 0.0);

        let runner_only = SubScores {
            runner_reliability: 100.0,
            ..SubScores::default()
        };
        assert!((weighted_score(&weights, &runner_only) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_healthy_bot_scores_full() {
        let now = Utc::now();
        let health = score_of(&healthy_snapshot(now), now);
        assert_eq!(health.score, 100);
        assert_eq!(health.reason, "All health components nominal");
        assert_eq!(health.components.len(), 6);
    }

    #[test]
    fn test_stalled_bot_loses_runner_weight() {
        let now = Utc::now();
        let mut s = healthy_snapshot(now);
        s.last_heartbeat_at = Some(now - Duration::minutes(30));

        let health = score_of(&s, now);
        // runner 10/100 -> 3 of 30 points
        assert_eq!(health.score, 73);
        assert!(health.reason.starts_with("runner reliability 10/100"));
    }

    #[test]
    fn test_component_rules() {
        let now = Utc::now();
        let mut s = healthy_snapshot(now);
        s.last_backtest = Some(BacktestRun {
            completed_at: now - Duration::days(30),
            succeeded: true,
        });
        s.rollup_metrics.trades = 15;
        s.rollup_metrics.max_drawdown_pct = 20.0;
        s.consecutive_failures = 1;
        s.recent_error_count = 2;

        let cfg = EngineConfig::default();
        let classification = StateClassifier::new(cfg.classifier).classify(&s, now);
        let sub = HealthScorer::new(&cfg).sub_scores(&s, &classification, now);
        assert_eq!(sub.runner_reliability, 100.0);
        assert_eq!(sub.backtest_success, 70.0);
        assert_eq!(sub.evolution_stability, 100.0);
        assert_eq!(sub.promotion_readiness, 50.0);
        assert_eq!(sub.risk_discipline, 50.0);
        assert_eq!(sub.error_frequency, 70.0);
    }

    #[test]
    fn test_restart_penalty() {
        let now = Utc::now();
        let mut s = healthy_snapshot(now);
        s.restart_count = 2;
        let cfg = EngineConfig::default();
        let classification = StateClassifier::new(cfg.classifier).classify(&s, now);
        let sub = HealthScorer::new(&cfg).sub_scores(&s, &classification, now);
        assert_eq!(sub.runner_reliability, 80.0);
    }

    #[test]
    fn test_idempotent() {
        let now = Utc::now();
        let s = healthy_snapshot(now);
        assert_eq!(score_of(&s, now), score_of(&s, now));
    }
}
