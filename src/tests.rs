//! Cross-module tests for the lifecycle engine

use crate::blocker::Severity;
use crate::config::EngineConfig;
use crate::engine::LifecycleEngine;
use crate::health::{display_health_state, HealthState};
use crate::promotion::{DemotionDecision, GateCode, GateStatus};
use crate::sizing::{
    size_for_bot, AccountSnapshot, BotRiskConfig, Instrument, OpenExposure, RiskTierConfig,
    SizingRequest,
};
use crate::types::{BacktestRun, RollupMetrics, RunnerState, Stage, TelemetrySnapshot};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

fn live_snapshot(now: DateTime<Utc>, stage: Stage) -> TelemetrySnapshot {
    let mut snapshot = TelemetrySnapshot::new(Uuid::new_v4(), stage);
    snapshot.last_heartbeat_at = Some(now - Duration::seconds(15));
    snapshot.runner_status_raw = Some("Scanning".to_string());
    snapshot.last_market_data_at = Some(now - Duration::seconds(20));
    snapshot.last_backtest = Some(BacktestRun {
        completed_at: now - Duration::days(2),
        succeeded: true,
    });
    snapshot.rollup_metrics = RollupMetrics {
        trades: 24,
        win_rate: 0.52,
        profit_factor: 1.3,
        sharpe: 0.9,
        max_drawdown_pct: 4.0,
        expectancy: 5.0,
        last_trade_at: None,
    };
    snapshot
}

fn sizing_request() -> SizingRequest {
    SizingRequest {
        account: AccountSnapshot {
            balance: Decimal::from(50_000),
            equity: Decimal::from(50_000),
            daily_pnl: Decimal::ZERO,
        },
        risk_tier: RiskTierConfig {
            name: "standard".to_string(),
            risk_percent_per_trade: Decimal::new(1, 2),
            max_risk_dollars_per_trade: Decimal::from(1_000),
            max_contracts_per_trade: 10,
            max_contracts_per_symbol: 10,
            max_total_exposure_contracts: 20,
            daily_loss_limit: None,
        },
        bot_risk: BotRiskConfig::default(),
        exposure: OpenExposure::default(),
        stop_distance_ticks: Some(20),
        instrument: Instrument {
            symbol: "ES".to_string(),
            tick_value: Decimal::new(1250, 2),
        },
    }
}

#[test]
fn test_display_health_state_table() {
    assert_eq!(display_health_state(100, false), HealthState::Ok);
    assert_eq!(display_health_state(80, false), HealthState::Ok);
    assert_eq!(display_health_state(80, true), HealthState::Blocked);
    assert_eq!(display_health_state(79, false), HealthState::Warn);
    assert_eq!(display_health_state(60, true), HealthState::Warn);
    assert_eq!(display_health_state(59, false), HealthState::Degraded);
    assert_eq!(display_health_state(0, true), HealthState::Degraded);
}

#[test]
fn test_near_paper_bot_end_to_end() {
    let engine = LifecycleEngine::from_config(&EngineConfig::default());
    let now = Utc::now();
    let eval = engine.evaluate_bot(&live_snapshot(now, Stage::Paper), None, now);

    assert_eq!(eval.state.runner_state, RunnerState::Scanning);
    assert_eq!(eval.promotion.gates[&GateCode::MinTrades].status, GateStatus::Near);
    assert!(!eval.promotion.allowed);
    assert_eq!(eval.demotion, DemotionDecision::Hold { stage: Stage::Paper });
}

#[test]
fn test_sizing_respects_bot_eligibility() {
    let engine = LifecycleEngine::from_config(&EngineConfig::default());
    let now = Utc::now();

    let healthy = engine.canonical_state(&live_snapshot(now, Stage::Live), now);
    let result = size_for_bot(&healthy, &sizing_request()).unwrap();
    assert_eq!(result.contracts, 2);

    let mut snapshot = live_snapshot(now, Stage::Live);
    snapshot.runner_status_raw = Some("crashed".to_string());
    let broken = engine.canonical_state(&snapshot, now);
    assert_eq!(broken.runner_state, RunnerState::Error);
    assert_eq!(broken.blockers[0].severity, Severity::Critical);

    let result = engine.size_for_bot(&broken, &sizing_request()).unwrap();
    assert_eq!(result.contracts, 0);
    let reason = result.reason_if_blocked.unwrap();
    assert!(reason.contains("RUNNER_ERROR"), "reason: {}", reason);
}

#[test]
fn test_sizing_validation_runs_before_eligibility() {
    let engine = LifecycleEngine::from_config(&EngineConfig::default());
    let now = Utc::now();
    let state = engine.canonical_state(&TelemetrySnapshot::new(Uuid::new_v4(), Stage::Live), now);
    let mut request = sizing_request();
    request.stop_distance_ticks = None;
    assert!(size_for_bot(&state, &request).is_err());
}

#[test]
fn test_blown_account_forces_live_bot_to_trials() {
    let engine = LifecycleEngine::from_config(&EngineConfig::default());
    let now = Utc::now();
    let account = AccountSnapshot {
        balance: Decimal::from(-150),
        equity: Decimal::from(-150),
        daily_pnl: Decimal::ZERO,
    };
    let eval = engine.evaluate_bot(&live_snapshot(now, Stage::Live), Some(&account), now);
    assert_eq!(eval.demotion.resulting_stage(), Stage::Trials);
}

#[test]
fn test_evaluation_serializes_snake_case() {
    let engine = LifecycleEngine::from_config(&EngineConfig::default());
    let now = Utc::now();
    let eval = engine.evaluate_bot(&live_snapshot(now, Stage::Paper), None, now);
    let json = serde_json::to_value(&eval).unwrap();

    assert_eq!(json["state"]["runner_state"], "SCANNING");
    assert_eq!(json["state"]["stage"], "PAPER");
    assert_eq!(json["promotion"]["target_stage"], "SHADOW");
    assert_eq!(json["promotion"]["gates"]["min_trades"]["status"], "NEAR");
    assert_eq!(json["promotion"]["gates"]["min_trades"]["value"], 24);
    assert_eq!(json["promotion"]["gates"]["min_trades"]["severity"], "error");
    assert_eq!(json["demotion"]["decision"], "hold");
}
