use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::application::freshness::FreshnessVerdict;
use crate::domain::errors::RejectReason;
use crate::domain::types::{Decision, Position, RiskLimits, SessionState};

/// Result of a risk validation check
#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    /// Validation passed, the decision may proceed
    Approved,
    /// Validation failed; structured reason plus human detail
    Rejected {
        reason: RejectReason,
        detail: String,
    },
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved)
    }

    pub fn rejection(&self) -> Option<(RejectReason, &str)> {
        match self {
            RiskVerdict::Rejected { reason, detail } => Some((*reason, detail.as_str())),
            RiskVerdict::Approved => None,
        }
    }
}

/// Context shared across all checks during one validation run.
///
/// Everything a check needs is captured here by reference, so the
/// gatekeeper stays stateless and deterministic over `(Decision, Context)`.
#[derive(Debug)]
pub struct RiskContext<'a> {
    pub decision: &'a Decision,

    /// Freshness re-validated for the analysis -> execution race window.
    pub freshness: &'a FreshnessVerdict,

    /// Session state of the decision's asset class right now.
    pub session: SessionState,

    /// Current total equity as reported by the venue.
    pub equity: Decimal,

    /// Realised + unrealised P&L since UTC midnight.
    pub day_pnl: Decimal,

    /// Running drawdown from the equity high-water mark, as a fraction.
    pub drawdown: f64,

    /// Open positions keyed by position id.
    pub positions: &'a HashMap<String, Position>,

    /// Last observed prices per symbol, for exposure valuation.
    pub current_prices: &'a HashMap<String, Decimal>,

    /// Recent one-period returns for the decision's instrument.
    pub returns: &'a [f64],

    /// Pairwise correlation matrix, when the analytics layer has one.
    pub correlations: Option<&'a HashMap<(String, String), f64>>,

    pub trades_today: u32,
    pub limits: &'a RiskLimits,

    /// Explicit override allowing forex/equity trades in a closed session.
    pub allow_closed_sessions: bool,
}

impl RiskContext<'_> {
    /// Notional exposure the decision would add, zero for unsized
    /// (signal-only) decisions.
    pub fn proposed_exposure(&self) -> Decimal {
        self.decision
            .recommended_size
            .map(|size| size * self.decision.entry)
            .unwrap_or(Decimal::ZERO)
    }

    /// Current absolute exposure held in a symbol.
    pub fn held_exposure(&self, symbol: &str) -> Decimal {
        self.positions
            .values()
            .filter(|p| p.instrument.symbol == symbol)
            .map(|p| {
                let price = self
                    .current_prices
                    .get(symbol)
                    .copied()
                    .unwrap_or(p.entry_price);
                (p.size * price).abs()
            })
            .sum()
    }
}

/// Trait for all risk checks.
///
/// Each check implements one rule; the pipeline runs enabled checks in
/// priority order and short-circuits on the first rejection.
#[async_trait]
pub trait RiskCheck: Send + Sync {
    /// Unique name for logging and introspection
    fn name(&self) -> &str;

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict;

    /// Priority order (lower = earlier execution)
    fn priority(&self) -> u8 {
        100
    }

    /// Disabled checks are skipped by the pipeline.
    fn is_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::application::freshness::{FreshnessReason, FreshnessVerdict};
    use crate::domain::types::{
        AssetClass, DecisionOrigin, EnsembleMeta, Instrument, TradeAction,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;

    pub fn test_decision(action: TradeAction, size: Option<Decimal>) -> Decision {
        Decision {
            id: uuid::Uuid::new_v4(),
            instrument: Instrument::new("BTC/USD", AssetClass::Crypto, "binance"),
            action,
            confidence: 70,
            recommended_size: size,
            entry: dec!(50000),
            stop_loss: Some(dec!(49000)),
            take_profit: Some(dec!(52000)),
            ensemble: EnsembleMeta::recovery(),
            signal_only: size.is_none(),
            origin: DecisionOrigin::Live,
            created_at: Utc::now(),
        }
    }

    pub fn fresh_verdict() -> FreshnessVerdict {
        FreshnessVerdict {
            fresh: true,
            age: chrono::Duration::seconds(5),
            limit: chrono::Duration::minutes(5),
            reason: FreshnessReason::Fresh,
        }
    }

    pub fn default_limits() -> RiskLimits {
        RiskLimits {
            max_drawdown: 0.15,
            max_var_pct: 0.05,
            max_single_position: 0.20,
            max_correlated: 2,
            correlation_threshold: 0.8,
            max_daily_trades: 10,
            kill_switch_pct: 0.05,
        }
    }

    /// Owned bundle the tests borrow a context from.
    pub struct ContextFixture {
        pub decision: Decision,
        pub freshness: FreshnessVerdict,
        pub positions: HashMap<String, Position>,
        pub prices: HashMap<String, Decimal>,
        pub returns: Vec<f64>,
        pub correlations: Option<HashMap<(String, String), f64>>,
        pub limits: RiskLimits,
        pub equity: Decimal,
        pub day_pnl: Decimal,
        pub drawdown: f64,
        pub trades_today: u32,
        pub session: SessionState,
        pub allow_closed_sessions: bool,
    }

    impl ContextFixture {
        pub fn buy() -> Self {
            Self {
                decision: test_decision(TradeAction::Buy, Some(dec!(0.01))),
                freshness: fresh_verdict(),
                positions: HashMap::new(),
                prices: HashMap::new(),
                returns: Vec::new(),
                correlations: None,
                limits: default_limits(),
                equity: dec!(100000),
                day_pnl: Decimal::ZERO,
                drawdown: 0.0,
                trades_today: 0,
                session: SessionState::Open,
                allow_closed_sessions: false,
            }
        }

        pub fn context(&self) -> RiskContext<'_> {
            RiskContext {
                decision: &self.decision,
                freshness: &self.freshness,
                session: self.session,
                equity: self.equity,
                day_pnl: self.day_pnl,
                drawdown: self.drawdown,
                positions: &self.positions,
                current_prices: &self.prices,
                returns: &self.returns,
                correlations: self.correlations.as_ref(),
                trades_today: self.trades_today,
                limits: &self.limits,
                allow_closed_sessions: self.allow_closed_sessions,
            }
        }
    }
}
