use async_trait::async_trait;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;

/// A decision headed for execution must carry a size; only signal-only
/// decisions may go unsized (they are published, not dispatched).
pub struct SizingSanityCheck;

#[async_trait]
impl RiskCheck for SizingSanityCheck {
    fn name(&self) -> &str {
        "SizingSanityCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        if ctx.decision.recommended_size.is_none() && !ctx.decision.signal_only {
            RiskVerdict::Rejected {
                reason: RejectReason::UnsizedExecutableDecision,
                detail: format!(
                    "decision {} has no size and is not signal-only",
                    ctx.decision.id
                ),
            }
        } else {
            RiskVerdict::Approved
        }
    }

    fn priority(&self) -> u8 {
        90
    }
}
