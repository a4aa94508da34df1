use async_trait::async_trait;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;
use crate::domain::types::{AssetClass, SessionState};

/// Forex and equity orders only execute while the market is open, unless
/// the operator explicitly allows closed-session trading.
pub struct SessionCheck;

#[async_trait]
impl RiskCheck for SessionCheck {
    fn name(&self) -> &str {
        "SessionCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        if ctx.decision.instrument.asset_class == AssetClass::Crypto {
            return RiskVerdict::Approved;
        }
        if ctx.session == SessionState::Open || ctx.allow_closed_sessions {
            return RiskVerdict::Approved;
        }
        RiskVerdict::Rejected {
            reason: RejectReason::SessionClosed,
            detail: format!(
                "{} session is {} for {}",
                ctx.decision.instrument.asset_class, ctx.session, ctx.decision.instrument.symbol
            ),
        }
    }

    fn priority(&self) -> u8 {
        20
    }
}

#[cfg(test)]
mod tests {
    use super::super::validator_trait::test_support::ContextFixture;
    use super::*;
    use crate::domain::types::Instrument;

    #[tokio::test]
    async fn test_crypto_trades_through_weekend() {
        let mut fixture = ContextFixture::buy();
        fixture.session = SessionState::Weekend;
        assert!(SessionCheck.check(&fixture.context()).await.is_approved());
    }

    #[tokio::test]
    async fn test_closed_forex_rejected_unless_allowed() {
        let mut fixture = ContextFixture::buy();
        fixture.decision.instrument = Instrument::new("EUR/USD", AssetClass::Forex, "oanda");
        fixture.session = SessionState::Closed;

        let verdict = SessionCheck.check(&fixture.context()).await;
        assert_eq!(
            verdict.rejection().map(|(r, _)| r),
            Some(RejectReason::SessionClosed)
        );

        fixture.allow_closed_sessions = true;
        assert!(SessionCheck.check(&fixture.context()).await.is_approved());
    }
}
