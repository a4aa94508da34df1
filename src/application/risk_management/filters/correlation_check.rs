use async_trait::async_trait;
use std::collections::HashSet;

use super::validator_trait::{RiskCheck, RiskContext, RiskVerdict};
use crate::domain::errors::RejectReason;

/// Diversification guard: the number of currently held instruments whose
/// pairwise correlation with the candidate reaches the threshold must stay
/// within `max_correlated`.
pub struct CorrelationCheck;

fn pair_correlation(
    matrix: &std::collections::HashMap<(String, String), f64>,
    a: &str,
    b: &str,
) -> f64 {
    matrix
        .get(&(a.to_string(), b.to_string()))
        .or_else(|| matrix.get(&(b.to_string(), a.to_string())))
        .copied()
        .unwrap_or(0.0)
}

#[async_trait]
impl RiskCheck for CorrelationCheck {
    fn name(&self) -> &str {
        "CorrelationCheck"
    }

    async fn check(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        let matrix = match ctx.correlations {
            Some(m) => m,
            // No data, nothing to judge against
            None => return RiskVerdict::Approved,
        };

        let target = &ctx.decision.instrument.symbol;
        let held: HashSet<&str> = ctx
            .positions
            .values()
            .map(|p| p.instrument.symbol.as_str())
            .filter(|s| s != target)
            .collect();

        let correlated: Vec<&str> = held
            .into_iter()
            .filter(|symbol| {
                pair_correlation(matrix, target, symbol).abs()
                    >= ctx.limits.correlation_threshold
            })
            .collect();

        if correlated.len() > ctx.limits.max_correlated {
            RiskVerdict::Rejected {
                reason: RejectReason::Correlation,
                detail: format!(
                    "{} held instruments correlated >= {:.2} with {} (max {}): {}",
                    correlated.len(),
                    ctx.limits.correlation_threshold,
                    target,
                    ctx.limits.max_correlated,
                    correlated.join(", ")
                ),
            }
        } else {
            RiskVerdict::Approved
        }
    }

    fn priority(&self) -> u8 {
        80
    }
}

#[cfg(test)]
mod tests {
    use super::super::validator_trait::test_support::ContextFixture;
    use super::*;
    use crate::domain::types::{
        AssetClass, Instrument, Position, PositionSide, PositionState,
    };
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn held(symbol: &str) -> Position {
        Position {
            id: format!("held-{}", symbol),
            instrument: Instrument::new(symbol, AssetClass::Crypto, "binance"),
            side: PositionSide::Long,
            entry_price: dec!(100),
            size: dec!(1),
            opened_at: Utc::now(),
            stop_loss: None,
            take_profit: None,
            peak_unrealised: Decimal::ZERO,
            trough_unrealised: Decimal::ZERO,
            state: PositionState::Open,
        }
    }

    fn matrix(pairs: &[(&str, &str, f64)]) -> HashMap<(String, String), f64> {
        pairs
            .iter()
            .map(|(a, b, c)| ((a.to_string(), b.to_string()), *c))
            .collect()
    }

    #[tokio::test]
    async fn test_too_many_correlated_holdings_rejected() {
        let mut fixture = ContextFixture::buy();
        fixture.limits.max_correlated = 1;
        for s in ["ETH/USD", "SOL/USD"] {
            fixture.positions.insert(s.to_string(), held(s));
        }
        fixture.correlations = Some(matrix(&[
            ("BTC/USD", "ETH/USD", 0.9),
            ("SOL/USD", "BTC/USD", 0.85), // reversed key order resolves too
        ]));

        let verdict = CorrelationCheck.check(&fixture.context()).await;
        assert_eq!(
            verdict.rejection().map(|(r, _)| r),
            Some(RejectReason::Correlation)
        );
    }

    #[tokio::test]
    async fn test_at_limit_passes() {
        let mut fixture = ContextFixture::buy();
        fixture.limits.max_correlated = 1;
        fixture.positions.insert("ETH/USD".to_string(), held("ETH/USD"));
        fixture.correlations = Some(matrix(&[("BTC/USD", "ETH/USD", 0.9)]));

        assert!(CorrelationCheck.check(&fixture.context()).await.is_approved());
    }

    #[tokio::test]
    async fn test_uncorrelated_holdings_ignored() {
        let mut fixture = ContextFixture::buy();
        fixture.limits.max_correlated = 0;
        fixture.positions.insert("XAU/USD".to_string(), held("XAU/USD"));
        fixture.correlations = Some(matrix(&[("BTC/USD", "XAU/USD", 0.2)]));

        assert!(CorrelationCheck.check(&fixture.context()).await.is_approved());
    }

    #[tokio::test]
    async fn test_missing_matrix_passes() {
        let mut fixture = ContextFixture::buy();
        fixture.positions.insert("ETH/USD".to_string(), held("ETH/USD"));
        assert!(CorrelationCheck.check(&fixture.context()).await.is_approved());
    }
}
