//! Position sizing.
//!
//! Order size derives from equity, per-trade risk budget, and the stop
//! distance. Anything that makes the formula meaningless (tiny account,
//! degenerate stop, unknown equity) flips the decision to signal-only:
//! publishable for a human, never auto-executed.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Fraction of equity risked per trade (e.g. 0.01).
    pub risk_per_trade: f64,
    /// Below this equity everything becomes signal-only.
    pub min_equity_floor: Decimal,
    /// Smallest order the venue accepts.
    pub venue_min_size: Decimal,
    /// Concentration cap as a fraction of equity; bounds size * entry.
    pub max_single_position: f64,
    /// Stop distance assumed when the decision carries no stop.
    pub default_stop_loss_pct: f64,
    /// Force signal-only regardless of inputs (e.g. equity unknown).
    pub signal_only_default: bool,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
            min_equity_floor: Decimal::from(100),
            venue_min_size: Decimal::new(1, 4), // 0.0001
            max_single_position: 0.20,
            default_stop_loss_pct: 0.02,
            signal_only_default: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizedOrder {
    pub size: Option<Decimal>,
    pub signal_only: bool,
}

impl SizedOrder {
    fn signal_only() -> Self {
        Self {
            size: None,
            signal_only: true,
        }
    }
}

pub struct SizingEngine {
    config: SizingConfig,
}

impl SizingEngine {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// `size = (equity * risk_per_trade) / |entry - stop|`, floored at the
    /// venue minimum and capped by the concentration cap.
    pub fn compute(
        &self,
        equity: Decimal,
        entry: Decimal,
        stop_loss: Option<Decimal>,
    ) -> SizedOrder {
        if self.config.signal_only_default {
            return SizedOrder::signal_only();
        }
        if equity <= self.config.min_equity_floor || entry <= Decimal::ZERO {
            return SizedOrder::signal_only();
        }

        let stop = match stop_loss {
            Some(s) if s > Decimal::ZERO => s,
            Some(_) => return SizedOrder::signal_only(),
            None => {
                let pct = Decimal::from_f64(self.config.default_stop_loss_pct)
                    .unwrap_or(Decimal::ZERO);
                if pct <= Decimal::ZERO {
                    return SizedOrder::signal_only();
                }
                entry - entry * pct
            }
        };

        let stop_distance = (entry - stop).abs();
        if stop_distance.is_zero() {
            return SizedOrder::signal_only();
        }

        let risk_budget =
            equity * Decimal::from_f64(self.config.risk_per_trade).unwrap_or(Decimal::ZERO);
        if risk_budget <= Decimal::ZERO {
            return SizedOrder::signal_only();
        }

        let mut size = risk_budget / stop_distance;
        if size < self.config.venue_min_size {
            size = self.config.venue_min_size;
        }

        // Concentration cap bounds the notional
        let cap = equity * Decimal::from_f64(self.config.max_single_position)
            .unwrap_or(Decimal::ZERO);
        let max_size_by_cap = cap / entry;
        if size > max_size_by_cap {
            size = max_size_by_cap;
        }
        if size < self.config.venue_min_size {
            // Cap and floor contradict: too small to execute sanely
            return SizedOrder::signal_only();
        }

        debug!(
            "SizingEngine: equity {} entry {} stop {} -> size {}",
            equity, entry, stop, size
        );

        SizedOrder {
            size: Some(size),
            signal_only: false,
        }
    }
}
