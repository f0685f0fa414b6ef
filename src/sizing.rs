//! Capital & sizing engine
//!
//! Turns an account's risk budget into a whole number of contracts. All money
//! math is done in `Decimal` so the floor is exact.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::CanonicalBotState;
use crate::error::SizingError;

/// Account balances at sizing time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    #[serde(default)]
    pub daily_pnl: Decimal,
}

impl AccountSnapshot {
    pub fn is_blown(&self) -> bool {
        self.balance <= Decimal::ZERO
    }
}

/// Account-level risk limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTierConfig {
    #[serde(default)]
    pub name: String,
    /// Fraction of equity, e.g. `0.01` for 1%
    pub risk_percent_per_trade: Decimal,
    pub max_risk_dollars_per_trade: Decimal,
    pub max_contracts_per_trade: u32,
    pub max_contracts_per_symbol: u32,
    pub max_total_exposure_contracts: u32,
    /// Positive dollar amount; breached once `daily_pnl <= -limit`
    #[serde(default)]
    pub daily_loss_limit: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotRiskConfig {
    /// Overrides the tier's risk percent when set
    pub risk_per_trade: Option<Decimal>,
}

/// Contracts already open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenExposure {
    pub symbol_contracts: u32,
    pub total_contracts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub tick_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingRequest {
    pub account: AccountSnapshot,
    pub risk_tier: RiskTierConfig,
    #[serde(default)]
    pub bot_risk: BotRiskConfig,
    #[serde(default)]
    pub exposure: OpenExposure,
    pub stop_distance_ticks: Option<u32>,
    pub instrument: Instrument,
}

/// Contract cap, in the order caps are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingCap {
    MaxContractsPerTrade,
    MaxContractsPerSymbol,
    MaxTotalExposureContracts,
}

impl SizingCap {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingCap::MaxContractsPerTrade => "max_contracts_per_trade",
            SizingCap::MaxContractsPerSymbol => "max_contracts_per_symbol",
            SizingCap::MaxTotalExposureContracts => "max_total_exposure_contracts",
        }
    }
}

impl std::fmt::Display for SizingCap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskPercentSource {
    BotOverride,
    RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationDetails {
    pub risk_percent_used: Decimal,
    pub risk_percent_source: RiskPercentSource,
    /// Unset when a policy block skipped the contract calculation
    pub raw_contracts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizingResult {
    pub contracts: u32,
    pub risk_dollars: Decimal,
    pub dollars_per_contract_at_stop: Decimal,
    pub capped_by: Option<SizingCap>,
    /// Set exactly when `contracts == 0`
    pub reason_if_blocked: Option<String>,
    pub calculation_details: CalculationDetails,
}

impl SizingResult {
    pub fn is_blocked(&self) -> bool {
        self.reason_if_blocked.is_some()
    }

    fn blocked(mut self, reason: String) -> Self {
        info!(reason = %reason, "Sizing blocked");
        self.contracts = 0;
        self.capped_by = None;
        self.reason_if_blocked = Some(reason);
        self
    }
}

/// Size a position for one trade.
///
/// Returns `Err` only for malformed input. Policy blocks come back as `Ok`
/// with zero contracts and a reason.
pub fn size(request: &SizingRequest) -> Result<SizingResult, SizingError> {
    let stop_ticks = match request.stop_distance_ticks {
        None => return Err(SizingError::MissingStopDistance),
        Some(0) => return Err(SizingError::ZeroStopDistance),
        Some(ticks) => ticks,
    };
    let tick_value = request.instrument.tick_value;
    if tick_value < Decimal::ZERO {
        return Err(SizingError::NegativeTickValue(tick_value));
    }

    let (risk_percent, source) = match request.bot_risk.risk_per_trade {
        Some(pct) => (pct, RiskPercentSource::BotOverride),
        None => (
            request.risk_tier.risk_percent_per_trade,
            RiskPercentSource::RiskTier,
        ),
    };
    if risk_percent <= Decimal::ZERO || risk_percent > Decimal::ONE {
        return Err(SizingError::InvalidRiskPercent(risk_percent));
    }

    let account = &request.account;
    if account.equity < Decimal::ZERO && account.balance > Decimal::ZERO {
        return Err(SizingError::NegativeEquity(account.equity));
    }

    let tier = &request.risk_tier;
    let risk_dollars = account
        .equity
        .checked_mul(risk_percent)
        .ok_or(SizingError::Overflow("risk dollars"))?
        .min(tier.max_risk_dollars_per_trade)
        .max(Decimal::ZERO);
    let dollars_per_contract = Decimal::from(stop_ticks)
        .checked_mul(tick_value)
        .ok_or(SizingError::Overflow("dollars per contract"))?;

    let mut result = SizingResult {
        contracts: 0,
        risk_dollars,
        dollars_per_contract_at_stop: dollars_per_contract,
        capped_by: None,
        reason_if_blocked: None,
        calculation_details: CalculationDetails {
            risk_percent_used: risk_percent,
            risk_percent_source: source,
            raw_contracts: None,
        },
    };

    if account.is_blown() {
        return Ok(result.blocked(format!(
            "Account blown: balance is {}",
            account.balance
        )));
    }
    if let Some(limit) = tier.daily_loss_limit {
        if account.daily_pnl <= -limit {
            return Ok(result.blocked(format!(
                "Daily loss limit breached: daily P&L {} against limit {}",
                account.daily_pnl, limit
            )));
        }
    }
    if dollars_per_contract.is_zero() {
        return Ok(result.blocked(format!(
            "Zero dollars per contract at stop for {}",
            request.instrument.symbol
        )));
    }

    let raw_contracts = risk_dollars
        .checked_div(dollars_per_contract)
        .ok_or(SizingError::Overflow("raw contracts"))?
        .floor()
        .to_u32()
        .unwrap_or(u32::MAX);
    result.calculation_details.raw_contracts = Some(raw_contracts);
    if raw_contracts == 0 {
        return Ok(result.blocked(format!(
            "Risk budget {} is below one contract at {} per contract",
            risk_dollars, dollars_per_contract
        )));
    }

    let exposure = request.exposure;
    let caps = [
        (SizingCap::MaxContractsPerTrade, tier.max_contracts_per_trade),
        (
            SizingCap::MaxContractsPerSymbol,
            tier.max_contracts_per_symbol
                .saturating_sub(exposure.symbol_contracts),
        ),
        (
            SizingCap::MaxTotalExposureContracts,
            tier.max_total_exposure_contracts
                .saturating_sub(exposure.total_contracts),
        ),
    ];

    // A later cap only takes over when strictly tighter
    let mut contracts = raw_contracts;
    let mut capped_by = None;
    for (cap, limit) in caps {
        if limit < contracts {
            contracts = limit;
            capped_by = Some(cap);
        }
    }

    if contracts == 0 {
        let cap = capped_by.unwrap_or(SizingCap::MaxContractsPerTrade);
        return Ok(result.blocked(format!(
            "No headroom under {} for {}",
            cap, request.instrument.symbol
        )));
    }

    result.contracts = contracts;
    result.capped_by = capped_by;
    debug!(
        symbol = %request.instrument.symbol,
        raw_contracts,
        contracts,
        capped_by = ?capped_by,
        "Sized position"
    );
    Ok(result)
}

/// Size a position for a specific bot, refusing bots that are not eligible
/// to trade. Input validation still runs first.
pub fn size_for_bot(
    state: &CanonicalBotState,
    request: &SizingRequest,
) -> Result<SizingResult, SizingError> {
    let result = size(request)?;

    if let Some(blocker) = state.blockers.iter().find(|b| b.is_critical()) {
        return Ok(result.blocked(format!(
            "Bot {} not eligible: {} ({})",
            state.bot_id, blocker.message, blocker.code
        )));
    }
    if state.health_state.is_disqualifying() {
        return Ok(result.blocked(format!(
            "Bot {} not eligible: health is {} ({})",
            state.bot_id, state.health_state, state.health_reason
        )));
    }
    Ok(result)
}
