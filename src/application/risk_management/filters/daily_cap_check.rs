use async_trait::async_trait;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;

/// Caps executions per UTC day. The counter is owned by the agent's trade
/// ledger and reset at UTC midnight during PERCEPTION.
pub struct DailyCapCheck;

#[async_trait]
impl RiskCheck for DailyCapCheck {
    fn name(&self) -> &str {
        "DailyCapCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        if ctx.trades_today >= ctx.limits.max_daily_trades {
            RiskVerdict::Rejected {
                reason: RejectReason::DailyTradeCap,
                detail: format!(
                    "{} trades today >= cap {}",
                    ctx.trades_today, ctx.limits.max_daily_trades
                ),
            }
        } else {
            RiskVerdict::Approved
        }
    }

    fn priority(&self) -> u8 {
        40
    }
}
