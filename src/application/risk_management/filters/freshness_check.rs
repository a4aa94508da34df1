use async_trait::async_trait;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;

/// Re-validates quote freshness at risk-check time. The gate already ran
/// during REASONING; this closes the race window between analysis and
/// execution.
pub struct FreshnessCheck;

#[async_trait]
impl RiskCheck for FreshnessCheck {
    fn name(&self) -> &str {
        "FreshnessCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        if ctx.freshness.fresh {
            RiskVerdict::Approved
        } else {
            RiskVerdict::Rejected {
                reason: RejectReason::StaleData,
                detail: format!(
                    "quote for {} is {}s old (limit {}s)",
                    ctx.decision.instrument.symbol,
                    ctx.freshness.age.num_seconds(),
                    ctx.freshness.limit.num_seconds()
                ),
            }
        }
    }

    fn priority(&self) -> u8 {
        10
    }
}
