use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::application::risk_management::var::{value_at_risk, MIN_SAMPLES};
use crate::domain::errors::RejectReason;

/// Bounds the decision's value-at-risk against `max_var_pct` of equity.
///
/// The bootstrap RNG is seeded from the decision id, so re-evaluating the
/// same `(Decision, Context)` pair always yields the same verdict.
pub struct VarCheck {
    samples: usize,
    confidence: f64,
}

impl VarCheck {
    pub fn new(samples: usize, confidence: f64) -> Self {
        Self {
            samples: samples.max(MIN_SAMPLES),
            confidence,
        }
    }
}

impl Default for VarCheck {
    fn default() -> Self {
        Self::new(MIN_SAMPLES, 0.99)
    }
}

fn decision_seed(id: uuid::Uuid) -> u64 {
    let bits = id.as_u128();
    (bits >> 64) as u64 ^ bits as u64
}

#[async_trait]
impl RiskCheck for VarCheck {
    fn name(&self) -> &str {
        "VarCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        let exposure = ctx.proposed_exposure();
        if exposure.is_zero() {
            // Unsized decisions carry no market risk to bound
            return RiskVerdict::Approved;
        }

        let var = value_at_risk(
            ctx.returns,
            exposure.to_f64().unwrap_or(0.0),
            ctx.decision.instrument.asset_class,
            self.samples,
            self.confidence,
            decision_seed(ctx.decision.id),
        );

        let ceiling = ctx.equity * Decimal::from_f64(ctx.limits.max_var_pct)
            .unwrap_or(Decimal::ZERO);
        let ceiling = ceiling.to_f64().unwrap_or(0.0);

        if var > ceiling {
            RiskVerdict::Rejected {
                reason: RejectReason::VarLimit,
                detail: format!(
                    "VaR {:.2} > {:.2} ({}% of equity)",
                    var,
                    ceiling,
                    ctx.limits.max_var_pct * 100.0
                ),
            }
        } else {
            RiskVerdict::Approved
        }
    }

    fn priority(&self) -> u8 {
        60
    }
}

#[cfg(test)]
mod tests {
    use super::super::validator_trait::test_support::ContextFixture;
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_small_exposure_passes() {
        // 0.01 BTC at 50k = 500 exposure; crypto prior VaR well under 5%
        // of 100k equity
        let fixture = ContextFixture::buy();
        assert!(VarCheck::default().check(&fixture.context()).await.is_approved());
    }

    #[tokio::test]
    async fn test_heavy_exposure_rejected() {
        let mut fixture = ContextFixture::buy();
        fixture.decision.recommended_size = Some(dec!(10)); // 500k exposure
        fixture.equity = dec!(10000);

        let verdict = VarCheck::default().check(&fixture.context()).await;
        assert_eq!(
            verdict.rejection().map(|(r, _)| r),
            Some(RejectReason::VarLimit)
        );
    }

    #[tokio::test]
    async fn test_deterministic_for_same_decision() {
        let mut fixture = ContextFixture::buy();
        fixture.returns = (0..60)
            .map(|i| if i % 3 == 0 { -0.03 } else { 0.01 })
            .collect();

        let first = VarCheck::default().check(&fixture.context()).await;
        let second = VarCheck::default().check(&fixture.context()).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unsized_decision_passes() {
        let mut fixture = ContextFixture::buy();
        fixture.decision.recommended_size = None;
        fixture.decision.signal_only = true;
        assert!(VarCheck::default().check(&fixture.context()).await.is_approved());
    }
}
