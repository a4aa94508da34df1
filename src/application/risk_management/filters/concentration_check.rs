use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;

/// Bounds total |exposure| per instrument to `max_single_position` of
/// equity, counting what is already held.
pub struct ConcentrationCheck;

#[async_trait]
impl RiskCheck for ConcentrationCheck {
    fn name(&self) -> &str {
        "ConcentrationCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        let symbol = &ctx.decision.instrument.symbol;
        let proposed = ctx.proposed_exposure().abs();
        let held = ctx.held_exposure(symbol);
        let total = held + proposed;

        let cap = ctx.equity * Decimal::from_f64(ctx.limits.max_single_position)
            .unwrap_or(Decimal::ZERO);

        if total > cap {
            RiskVerdict::Rejected {
                reason: RejectReason::Concentration,
                detail: format!(
                    "exposure {} + held {} in {} exceeds cap {} ({}% of equity)",
                    proposed,
                    held,
                    symbol,
                    cap,
                    ctx.limits.max_single_position * 100.0
                ),
            }
        } else {
            RiskVerdict::Approved
        }
    }

    fn priority(&self) -> u8 {
        70
    }
}
