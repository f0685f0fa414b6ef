//! Lifecycle engine - runs every stage of a bot evaluation in a fixed order

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::blocker::Blocker;
use crate::broker::BrokerVerification;
use crate::classifier::StateClassifier;
use crate::config::EngineConfig;
use crate::error::{PromotionError, SizingError};
use crate::health::{health_state_for, ComponentScore, HealthScorer, HealthState};
use crate::promotion::{
    promote, DemotionDecision, GateCode, PromotionEngine, PromotionEvaluation, PromotionInput,
};
use crate::sizing::{size_for_bot, AccountSnapshot, SizingRequest, SizingResult};
use crate::types::{EvolutionState, JobState, RunnerState, Stage, TelemetrySnapshot};

/// Display-ready view of one bot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalBotState {
    pub bot_id: Uuid,
    pub stage: Stage,
    pub runner_state: RunnerState,
    pub job_state: JobState,
    pub evolution_state: EvolutionState,
    pub health_score: u8,
    pub health_state: HealthState,
    pub health_reason: String,
    pub health_components: Vec<ComponentScore>,
    /// Classifier blockers, most severe first
    pub blockers: Vec<Blocker>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub broker: Option<BrokerVerification>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotEvaluation {
    pub bot_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub state: CanonicalBotState,
    pub promotion: PromotionEvaluation,
    pub demotion: DemotionDecision,
}

impl BotEvaluation {
    /// Callers discard evaluations older than `max_age`
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.evaluated_at) <= max_age
    }
}

/// Owns one instance of each component, built from a single config.
///
/// Holds no mutable state; share it across tasks behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LifecycleEngine {
    classifier: StateClassifier,
    scorer: HealthScorer,
    promotion: PromotionEngine,
}

impl LifecycleEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            classifier: StateClassifier::new(config.classifier),
            scorer: HealthScorer::new(config),
            promotion: PromotionEngine::new(config.promotion),
        }
    }

    pub fn classifier(&self) -> &StateClassifier {
        &self.classifier
    }

    pub fn promotion_engine(&self) -> &PromotionEngine {
        &self.promotion
    }

    /// Build the canonical state only
    pub fn canonical_state(
        &self,
        snapshot: &TelemetrySnapshot,
        now: DateTime<Utc>,
    ) -> CanonicalBotState {
        let classification = self.classifier.classify(snapshot, now);
        let health = self.scorer.score(snapshot, &classification, now);
        let health_state = health_state_for(health.score, &classification.blockers);

        CanonicalBotState {
            bot_id: snapshot.bot_id,
            stage: snapshot.stage,
            runner_state: classification.runner_state,
            job_state: classification.job_state,
            evolution_state: classification.evolution_state,
            health_score: health.score,
            health_state,
            health_reason: health.reason,
            health_components: health.components,
            blockers: classification.blockers,
            last_heartbeat_at: snapshot.last_heartbeat_at,
            broker: snapshot.broker.as_ref().map(BrokerVerification::from_link),
        }
    }

    /// classify, score, display state, promotion, demotion
    pub fn evaluate_bot(
        &self,
        snapshot: &TelemetrySnapshot,
        account: Option<&AccountSnapshot>,
        now: DateTime<Utc>,
    ) -> BotEvaluation {
        let state = self.canonical_state(snapshot, now);

        let input = PromotionInput {
            stage: snapshot.stage,
            rollup: &snapshot.rollup_metrics,
            health: state.health_state,
            blockers: &state.blockers,
            last_backtest: snapshot.last_backtest,
            broker: state.broker,
            account,
        };
        let promotion = self.promotion.evaluate(&input, now);
        let demotion = self.promotion.evaluate_demotion(&input, now);

        debug!(
            bot_id = %snapshot.bot_id,
            stage = %snapshot.stage,
            runner = %state.runner_state,
            health = state.health_score,
            allowed = promotion.allowed,
            "Evaluated bot"
        );

        BotEvaluation {
            bot_id: snapshot.bot_id,
            evaluated_at: now,
            state,
            promotion,
            demotion,
        }
    }

    /// Promote using a previous evaluation, rejecting it if older than
    /// `max_age_secs`
    pub fn promote(
        &self,
        evaluation: &BotEvaluation,
        acknowledged: &[GateCode],
        now: DateTime<Utc>,
        max_age_secs: i64,
    ) -> Result<Stage, PromotionError> {
        promote(&evaluation.promotion, acknowledged, now, max_age_secs)
    }

    pub fn size_for_bot(
        &self,
        state: &CanonicalBotState,
        request: &SizingRequest,
    ) -> Result<SizingResult, SizingError> {
        size_for_bot(state, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BacktestRun, RollupMetrics};

    fn healthy_snapshot(now: DateTime<Utc>) -> TelemetrySnapshot {
        let mut snapshot = TelemetrySnapshot::new(Uuid::new_v4(), Stage::Paper);
        snapshot.last_heartbeat_at = Some(now - Duration::seconds(10));
        snapshot.runner_status_raw = Some("trading".to_string());
        snapshot.last_market_data_at = Some(now - Duration::seconds(5));
        snapshot.last_backtest = Some(BacktestRun {
            completed_at: now - Duration::days(1),
            succeeded: true,
        });
        snapshot.rollup_metrics = RollupMetrics {
            trades: 30,
            win_rate: 0.6,
            profit_factor: 1.5,
            sharpe: 1.1,
            max_drawdown_pct: 5.0,
            expectancy: 8.0,
            last_trade_at: Some(now - Duration::minutes(3)),
        };
        snapshot
    }

    #[test]
    fn test_healthy_bot_is_promotable() {
        let engine = LifecycleEngine::from_config(&EngineConfig::default());
        let now = Utc::now();
        let eval = engine.evaluate_bot(&healthy_snapshot(now), None, now);

        assert_eq!(eval.state.runner_state, RunnerState::Trading);
        assert_eq!(eval.state.health_state, HealthState::Ok);
        assert!(eval.state.blockers.is_empty());
        assert_eq!(eval.promotion.target_stage, Some(Stage::Shadow));
        // No broker link: warning gate for SHADOW, so allowed with acknowledgement
        assert!(eval.promotion.allowed);
        assert_eq!(
            eval.promotion.requires_acknowledgement,
            vec![GateCode::BrokerVerified]
        );
        assert_eq!(eval.demotion, DemotionDecision::Hold { stage: Stage::Paper });
        assert_eq!(
            engine.promote(&eval, &[GateCode::BrokerVerified], now, 60),
            Ok(Stage::Shadow)
        );
    }

    #[test]
    fn test_stale_heartbeat_blocks_promotion() {
        let engine = LifecycleEngine::from_config(&EngineConfig::default());
        let now = Utc::now();
        let mut snapshot = healthy_snapshot(now);
        snapshot.last_heartbeat_at = Some(now - Duration::minutes(30));
        let eval = engine.evaluate_bot(&snapshot, None, now);

        assert_eq!(eval.state.runner_state, RunnerState::Stalled);
        // 72/100 with a critical blocker still shows WARN; the blocker gate stops it
        assert_eq!(eval.state.health_score, 72);
        assert_eq!(eval.state.health_state, HealthState::Warn);
        assert!(!eval.promotion.allowed);
        assert!(!eval.promotion.gates[&GateCode::CriticalBlockers].pass);
    }

    #[test]
    fn test_freshness() {
        let engine = LifecycleEngine::from_config(&EngineConfig::default());
        let now = Utc::now();
        let eval = engine.evaluate_bot(&healthy_snapshot(now), None, now);
        assert!(eval.is_fresh(now + Duration::seconds(30), Duration::seconds(60)));
        assert!(!eval.is_fresh(now + Duration::seconds(90), Duration::seconds(60)));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let engine = LifecycleEngine::from_config(&EngineConfig::default());
        let now = Utc::now();
        let snapshot = healthy_snapshot(now);
        assert_eq!(
            engine.evaluate_bot(&snapshot, None, now),
            engine.evaluate_bot(&snapshot, None, now)
        );
    }
}
