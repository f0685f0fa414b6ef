//! Promotion gate engine
//!
//! Decides whether a bot may advance to the next stage, and whether a bot
//! must fall back to an earlier one. Gates are evaluated into a single map;
//! `error` gates block, `warning` gates need an operator acknowledgement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::blocker::{Blocker, BlockerCategory, BlockerKind, Severity};
use crate::broker::BrokerVerification;
use crate::config::PromotionConfig;
use crate::error::PromotionError;
use crate::health::HealthState;
use crate::sizing::AccountSnapshot;
use crate::types::{BacktestRun, RollupMetrics, Stage};

/// Named promotion gate
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GateCode {
    MinTrades,
    HealthTier,
    CriticalBlockers,
    BacktestFresh,
    Drawdown,
    ProfitFactor,
    BrokerVerified,
    AccountFunded,
}

impl GateCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateCode::MinTrades => "min_trades",
            GateCode::HealthTier => "health_tier",
            GateCode::CriticalBlockers => "critical_blockers",
            GateCode::BacktestFresh => "backtest_fresh",
            GateCode::Drawdown => "drawdown",
            GateCode::ProfitFactor => "profit_factor",
            GateCode::BrokerVerified => "broker_verified",
            GateCode::AccountFunded => "account_funded",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GateCode::MinTrades => "Minimum trades",
            GateCode::HealthTier => "Health tier",
            GateCode::CriticalBlockers => "No critical blockers",
            GateCode::BacktestFresh => "Fresh backtest",
            GateCode::Drawdown => "Max drawdown",
            GateCode::ProfitFactor => "Profit factor",
            GateCode::BrokerVerified => "Broker verified",
            GateCode::AccountFunded => "Account funded",
        }
    }

    pub fn blocker_code(&self) -> &'static str {
        match self {
            GateCode::MinTrades => "GATE_MIN_TRADES",
            GateCode::HealthTier => "GATE_HEALTH_TIER",
            GateCode::CriticalBlockers => "GATE_CRITICAL_BLOCKERS",
            GateCode::BacktestFresh => "GATE_BACKTEST_FRESH",
            GateCode::Drawdown => "GATE_DRAWDOWN",
            GateCode::ProfitFactor => "GATE_PROFIT_FACTOR",
            GateCode::BrokerVerified => "GATE_BROKER_VERIFIED",
            GateCode::AccountFunded => "GATE_ACCOUNT_FUNDED",
        }
    }

    pub fn category(&self) -> BlockerCategory {
        match self {
            GateCode::MinTrades | GateCode::HealthTier | GateCode::CriticalBlockers => {
                BlockerCategory::Eligibility
            }
            GateCode::BacktestFresh => BlockerCategory::Data,
            GateCode::Drawdown => BlockerCategory::Risk,
            GateCode::ProfitFactor => BlockerCategory::Performance,
            GateCode::BrokerVerified | GateCode::AccountFunded => BlockerCategory::Capital,
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            GateCode::MinTrades => "Keep trading at the current stage until the trade target is met",
            GateCode::HealthTier => "Resolve health issues until the bot is OK or WARN",
            GateCode::CriticalBlockers => "Clear all critical blockers",
            GateCode::BacktestFresh => "Run a new backtest",
            GateCode::Drawdown => "Reduce risk until drawdown is back within the limit",
            GateCode::ProfitFactor => "Review strategy performance",
            GateCode::BrokerVerified => "Connect and verify the broker account",
            GateCode::AccountFunded => "Review account capital",
        }
    }

    /// Gate-specific call to action, if one exists
    pub fn cta(&self) -> Option<CtaAction> {
        match self {
            GateCode::BacktestFresh => Some(CtaAction::RunBacktest),
            GateCode::BrokerVerified => Some(CtaAction::ConnectBroker),
            GateCode::HealthTier | GateCode::CriticalBlockers => Some(CtaAction::ViewHealthIssues),
            GateCode::AccountFunded => Some(CtaAction::ReviewCapital),
            GateCode::MinTrades | GateCode::Drawdown | GateCode::ProfitFactor => None,
        }
    }
}

impl std::fmt::Display for GateCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gate severity; `Error` maps to a CRITICAL blocker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateSeverity {
    Error,
    Warning,
    Info,
}

impl GateSeverity {
    pub fn blocker_severity(&self) -> Severity {
        match self {
            GateSeverity::Error => Severity::Critical,
            GateSeverity::Warning => Severity::Warning,
            GateSeverity::Info => Severity::Info,
        }
    }
}

/// Gate bucket; only `Passed` counts toward progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Passed,
    Near,
    Below,
}

/// Measured or required gate value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GateValue {
    Count(u32),
    Number(f64),
    Text(String),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateResult {
    pub value: GateValue,
    pub required: GateValue,
    pub pass: bool,
    pub status: GateStatus,
    pub severity: GateSeverity,
    pub category: BlockerCategory,
    pub label: &'static str,
}

impl GateResult {
    fn new(
        gate: GateCode,
        severity: GateSeverity,
        value: GateValue,
        required: GateValue,
        pass: bool,
    ) -> Self {
        Self {
            value,
            required,
            pass,
            status: if pass { GateStatus::Passed } else { GateStatus::Below },
            severity,
            category: gate.category(),
            label: gate.label(),
        }
    }
}

/// Operator next step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaAction {
    RunBacktest,
    ConnectBroker,
    ViewHealthIssues,
    ReviewCapital,
    OpenAuditChecklist,
}

impl CtaAction {
    pub fn label(&self) -> &'static str {
        match self {
            CtaAction::RunBacktest => "Run Backtest",
            CtaAction::ConnectBroker => "Connect Broker",
            CtaAction::ViewHealthIssues => "View Health Issues",
            CtaAction::ReviewCapital => "Review Capital",
            CtaAction::OpenAuditChecklist => "Open Audit Checklist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cta {
    pub action: CtaAction,
    pub label: &'static str,
}

impl From<CtaAction> for Cta {
    fn from(action: CtaAction) -> Self {
        Self {
            action,
            label: action.label(),
        }
    }
}

/// Everything the gate engine looks at for one bot
#[derive(Debug, Clone, Copy)]
pub struct PromotionInput<'a> {
    pub stage: Stage,
    pub rollup: &'a RollupMetrics,
    pub health: HealthState,
    /// Classifier blockers
    pub blockers: &'a [Blocker],
    pub last_backtest: Option<BacktestRun>,
    pub broker: Option<BrokerVerification>,
    pub account: Option<&'a AccountSnapshot>,
}

/// Result of evaluating a bot against its next stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionEvaluation {
    pub current_stage: Stage,
    pub target_stage: Option<Stage>,
    pub gates: BTreeMap<GateCode, GateResult>,
    /// `100 × passed / total`; 100 when there are no gates
    pub progress_percent: f64,
    /// No error gate fails and a next stage exists
    pub allowed: bool,
    /// Failing warning gates the operator must acknowledge to promote
    pub requires_acknowledgement: Vec<GateCode>,
    pub blockers: Vec<Blocker>,
    pub ctas: Vec<Cta>,
    pub evaluated_at: DateTime<Utc>,
}

impl PromotionEvaluation {
    pub fn failing_gates(&self, severity: GateSeverity) -> Vec<GateCode> {
        self.gates
            .iter()
            .filter(|(_, g)| !g.pass && g.severity == severity)
            .map(|(code, _)| *code)
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.gates.values().all(|g| g.pass)
    }
}

/// Demotion verdict for one evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DemotionDecision {
    Hold { stage: Stage },
    /// `to` is always one stage below `from`; `highest_satisfied` is where
    /// the bot would land without the one-step clamp
    Demote {
        from: Stage,
        to: Stage,
        highest_satisfied: Stage,
        reasons: Vec<GateCode>,
    },
    /// Safety blocker: straight back to TRIALS
    ForceTrials { from: Stage, reason: String },
}

impl DemotionDecision {
    pub fn resulting_stage(&self) -> Stage {
        match self {
            DemotionDecision::Hold { stage } => *stage,
            DemotionDecision::Demote { to, .. } => *to,
            DemotionDecision::ForceTrials { .. } => Stage::Trials,
        }
    }
}

/// Gate engine; holds only configuration
#[derive(Debug, Clone)]
pub struct PromotionEngine {
    config: PromotionConfig,
}

impl PromotionEngine {
    pub fn new(config: PromotionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    /// Evaluate promotion from `input.stage` to the next stage
    pub fn evaluate(&self, input: &PromotionInput<'_>, now: DateTime<Utc>) -> PromotionEvaluation {
        let target_stage = input.stage.next();
        let gates = match target_stage {
            Some(target) => self.gates_for(input.stage, target, input, now),
            None => BTreeMap::new(),
        };

        let total = gates.len();
        let passed = gates.values().filter(|g| g.pass).count();
        let progress_percent = if total == 0 {
            100.0
        } else {
            100.0 * passed as f64 / total as f64
        };

        let mut blockers = Vec::new();
        let mut ctas: Vec<Cta> = Vec::new();
        let mut needs_fallback = false;
        for (code, gate) in gates.iter().filter(|(_, g)| !g.pass) {
            blockers.push(Blocker::from(gate_blocker(*code, gate, input)));
            match code.cta() {
                Some(action) => {
                    if !ctas.iter().any(|c| c.action == action) {
                        ctas.push(action.into());
                    }
                }
                None => needs_fallback = true,
            }
        }
        if needs_fallback {
            ctas.push(CtaAction::OpenAuditChecklist.into());
        }
        crate::blocker::sort_by_severity(&mut blockers);

        let failing_errors: Vec<GateCode> = gates
            .iter()
            .filter(|(_, g)| !g.pass && g.severity == GateSeverity::Error)
            .map(|(code, _)| *code)
            .collect();
        let requires_acknowledgement: Vec<GateCode> = gates
            .iter()
            .filter(|(_, g)| !g.pass && g.severity == GateSeverity::Warning)
            .map(|(code, _)| *code)
            .collect();
        let allowed = target_stage.is_some() && failing_errors.is_empty();

        match target_stage {
            Some(target) if allowed => info!(
                from = %input.stage,
                to = %target,
                progress = progress_percent,
                acknowledgements = requires_acknowledgement.len(),
                "Promotion gates cleared"
            ),
            Some(target) => debug!(
                from = %input.stage,
                to = %target,
                failing = ?failing_errors,
                "Promotion blocked"
            ),
            None => debug!(stage = %input.stage, "Terminal stage, nothing to promote to"),
        }

        PromotionEvaluation {
            current_stage: input.stage,
            target_stage,
            gates,
            progress_percent,
            allowed,
            requires_acknowledgement,
            blockers,
            ctas,
            evaluated_at: now,
        }
    }

    /// Check whether a bot still holds its current stage
    pub fn evaluate_demotion(
        &self,
        input: &PromotionInput<'_>,
        now: DateTime<Utc>,
    ) -> DemotionDecision {
        let from = input.stage;

        let safety = input
            .blockers
            .iter()
            .find(|b| b.detail.is_safety_critical())
            .map(|b| b.message.clone())
            .or_else(|| {
                input
                    .account
                    .filter(|a| a.is_blown())
                    .map(|a| format!("Account blown: balance is {}", a.balance))
            });
        if let Some(reason) = safety {
            if from == Stage::Trials {
                return DemotionDecision::Hold { stage: from };
            }
            warn!(from = %from, reason = %reason, "Safety blocker, forcing bot back to TRIALS");
            return DemotionDecision::ForceTrials { from, reason };
        }

        let Some(entered_from) = from.previous() else {
            return DemotionDecision::Hold { stage: from };
        };

        let reasons = self.failing_retention_gates(entered_from, from, input, now);
        if reasons.is_empty() {
            return DemotionDecision::Hold { stage: from };
        }

        // Highest lower stage whose entry gates still hold; TRIALS has none
        let mut highest_satisfied = Stage::Trials;
        let mut stage = entered_from;
        while let Some(prev) = stage.previous() {
            if self.failing_retention_gates(prev, stage, input, now).is_empty() {
                highest_satisfied = stage;
                break;
            }
            stage = prev;
        }
        // Never more than one step per cycle
        let to = entered_from;

        warn!(
            from = %from,
            to = %to,
            highest_satisfied = %highest_satisfied,
            reasons = ?reasons,
            "Bot no longer satisfies its stage gates, flagging for demotion"
        );
        DemotionDecision::Demote {
            from,
            to,
            highest_satisfied,
            reasons,
        }
    }

    /// Error gates guarding entry into `target`, minus the trade count: trade
    /// targets are earned once and are not re-checked against per-stage rollups.
    fn failing_retention_gates(
        &self,
        entered_from: Stage,
        target: Stage,
        input: &PromotionInput<'_>,
        now: DateTime<Utc>,
    ) -> Vec<GateCode> {
        self.gates_for(entered_from, target, input, now)
            .into_iter()
            .filter(|(code, g)| {
                *code != GateCode::MinTrades && !g.pass && g.severity == GateSeverity::Error
            })
            .map(|(code, _)| code)
            .collect()
    }

    fn gates_for(
        &self,
        current: Stage,
        target: Stage,
        input: &PromotionInput<'_>,
        now: DateTime<Utc>,
    ) -> BTreeMap<GateCode, GateResult> {
        let cfg = &self.config;
        let mut gates = BTreeMap::new();
        let trade_threshold = cfg.trade_thresholds.for_stage(current);

        if let Some(threshold) = trade_threshold {
            let trades = input.rollup.trades;
            let status = trade_status(trades, threshold, cfg.near_band_ratio);
            gates.insert(
                GateCode::MinTrades,
                GateResult {
                    value: GateValue::Count(trades),
                    required: GateValue::Count(threshold),
                    pass: status == GateStatus::Passed,
                    status,
                    severity: GateSeverity::Error,
                    category: GateCode::MinTrades.category(),
                    label: GateCode::MinTrades.label(),
                },
            );
        }

        gates.insert(
            GateCode::HealthTier,
            GateResult::new(
                GateCode::HealthTier,
                GateSeverity::Error,
                GateValue::Text(input.health.as_str().to_string()),
                GateValue::Text("OK or WARN".to_string()),
                !input.health.is_disqualifying(),
            ),
        );

        let critical = input.blockers.iter().filter(|b| b.is_critical()).count() as u32;
        gates.insert(
            GateCode::CriticalBlockers,
            GateResult::new(
                GateCode::CriticalBlockers,
                GateSeverity::Error,
                GateValue::Count(critical),
                GateValue::Count(0),
                critical == 0,
            ),
        );

        let (backtest_value, backtest_pass) = match input.last_backtest {
            Some(run) => {
                let age = run.age_secs(now);
                (
                    GateValue::Number(age as f64),
                    run.succeeded && age <= cfg.backtest_max_age_secs,
                )
            }
            None => (GateValue::Missing, false),
        };
        gates.insert(
            GateCode::BacktestFresh,
            GateResult::new(
                GateCode::BacktestFresh,
                GateSeverity::Warning,
                backtest_value,
                GateValue::Number(cfg.backtest_max_age_secs as f64),
                backtest_pass,
            ),
        );

        let drawdown = input.rollup.max_drawdown_pct.abs();
        gates.insert(
            GateCode::Drawdown,
            GateResult::new(
                GateCode::Drawdown,
                GateSeverity::Error,
                GateValue::Number(drawdown),
                GateValue::Number(cfg.max_drawdown_pct),
                drawdown <= cfg.max_drawdown_pct,
            ),
        );

        // Only stages that trade have a meaningful profit factor
        if trade_threshold.is_some() {
            let pf = input.rollup.profit_factor;
            gates.insert(
                GateCode::ProfitFactor,
                GateResult::new(
                    GateCode::ProfitFactor,
                    GateSeverity::Warning,
                    GateValue::Number(pf),
                    GateValue::Number(cfg.min_profit_factor),
                    pf >= cfg.min_profit_factor,
                ),
            );
        }

        if target >= Stage::Shadow {
            let severity = if target >= Stage::Canary {
                GateSeverity::Error
            } else {
                GateSeverity::Warning
            };
            let (value, pass) = match input.broker {
                Some(v) => (GateValue::Text(v.describe()), v.is_verified()),
                None => (GateValue::Missing, false),
            };
            gates.insert(
                GateCode::BrokerVerified,
                GateResult::new(
                    GateCode::BrokerVerified,
                    severity,
                    value,
                    GateValue::Text("verified".to_string()),
                    pass,
                ),
            );
        }

        if let Some(account) = input.account {
            gates.insert(
                GateCode::AccountFunded,
                GateResult::new(
                    GateCode::AccountFunded,
                    GateSeverity::Error,
                    GateValue::Text(account.balance.to_string()),
                    GateValue::Text("> 0".to_string()),
                    !account.is_blown(),
                ),
            );
        }

        gates
    }
}

/// Bucket a trade count against its target
pub fn trade_status(trades: u32, threshold: u32, near_band_ratio: f64) -> GateStatus {
    if trades >= threshold {
        GateStatus::Passed
    } else if f64::from(trades) + 1e-9 >= near_band_ratio * f64::from(threshold) {
        GateStatus::Near
    } else {
        GateStatus::Below
    }
}

fn gate_blocker(code: GateCode, gate: &GateResult, input: &PromotionInput<'_>) -> BlockerKind {
    if code == GateCode::AccountFunded {
        if let Some(account) = input.account {
            return BlockerKind::AccountBlown {
                balance: account.balance.to_string(),
            };
        }
    }
    let detail = match (&gate.value, &gate.required) {
        (GateValue::Count(v), GateValue::Count(r)) => format!("{} of {} required", v, r),
        (GateValue::Number(v), GateValue::Number(r)) => format!("{:.2} vs required {:.2}", v, r),
        (GateValue::Text(v), GateValue::Text(r)) => format!("{} (required {})", v, r),
        (GateValue::Missing, _) => "no data".to_string(),
        _ => "not satisfied".to_string(),
    };
    BlockerKind::GateFailed {
        gate: code,
        severity: gate.severity.blocker_severity(),
        detail,
    }
}

/// Apply an operator's promotion request against a fresh evaluation.
///
/// Every failing warning gate must be acknowledged; error gates cannot be
/// overridden.
pub fn promote(
    evaluation: &PromotionEvaluation,
    acknowledged: &[GateCode],
    now: DateTime<Utc>,
    max_age_secs: i64,
) -> Result<Stage, PromotionError> {
    let age_secs = (now - evaluation.evaluated_at).num_seconds();
    if age_secs > max_age_secs {
        return Err(PromotionError::StaleEvaluation {
            age_secs,
            max_age_secs,
        });
    }

    let Some(target) = evaluation.target_stage else {
        return Err(PromotionError::TerminalStage(evaluation.current_stage));
    };

    if !evaluation.allowed {
        return Err(PromotionError::Blocked {
            stage: evaluation.current_stage,
            gates: evaluation.failing_gates(GateSeverity::Error),
        });
    }

    let missing: Vec<GateCode> = evaluation
        .requires_acknowledgement
        .iter()
        .filter(|g| !acknowledged.contains(g))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(PromotionError::Unacknowledged { gates: missing });
    }

    info!(
        from = %evaluation.current_stage,
        to = %target,
        overridden = ?evaluation.requires_acknowledgement,
        "Promotion approved"
    );
    Ok(target)
}
