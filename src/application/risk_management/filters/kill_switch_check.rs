use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;

/// Rejects everything once today's P&L breaches the kill-switch floor.
/// PERCEPTION halts the agent on the same condition; this check covers
/// decisions already in flight when the floor was crossed.
pub struct KillSwitchCheck;

pub fn kill_switch_engaged(day_pnl: Decimal, equity: Decimal, kill_switch_pct: f64) -> bool {
    let floor = equity * Decimal::from_f64(kill_switch_pct).unwrap_or(Decimal::ZERO);
    day_pnl <= -floor && floor > Decimal::ZERO
}

#[async_trait]
impl RiskCheck for KillSwitchCheck {
    fn name(&self) -> &str {
        "KillSwitchCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        if kill_switch_engaged(ctx.day_pnl, ctx.equity, ctx.limits.kill_switch_pct) {
            RiskVerdict::Rejected {
                reason: RejectReason::KillSwitch,
                detail: format!(
                    "day P&L {} breaches {}% of equity {}",
                    ctx.day_pnl,
                    ctx.limits.kill_switch_pct * 100.0,
                    ctx.equity
                ),
            }
        } else {
            RiskVerdict::Approved
        }
    }

    fn priority(&self) -> u8 {
        30
    }
}
