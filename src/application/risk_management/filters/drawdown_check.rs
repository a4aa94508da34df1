use async_trait::async_trait;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;

/// Blocks new entries while the running drawdown from the equity
/// high-water mark exceeds the configured ceiling.
pub struct DrawdownCheck;

#[async_trait]
impl RiskCheck for DrawdownCheck {
    fn name(&self) -> &str {
        "DrawdownCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        if ctx.drawdown > ctx.limits.max_drawdown {
            RiskVerdict::Rejected {
                reason: RejectReason::DrawdownLimit,
                detail: format!(
                    "drawdown {:.2}% > limit {:.2}%",
                    ctx.drawdown * 100.0,
                    ctx.limits.max_drawdown * 100.0
                ),
            }
        } else {
            RiskVerdict::Approved
        }
    }

    fn priority(&self) -> u8 {
        50
    }
}
