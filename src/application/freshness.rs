//! Freshness gate.
//!
//! Judges whether a quote is recent enough to reason on, given the asset
//! class, the session state, and the quote granularity. Between the soft
//! limit and the hard limit the quote still passes but the verdict carries
//! a warning; at or past the hard limit the instrument must yield
//! NO_DECISION for this cycle.

use crate::domain::types::{AssetClass, Granularity, Quote, SessionState};
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessReason {
    Fresh,
    /// Past the soft limit but under the hard limit.
    Warn,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessVerdict {
    pub fresh: bool,
    pub age: Duration,
    pub limit: Duration,
    pub reason: FreshnessReason,
}

#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    /// Warn band lower bound, shared across classes.
    pub soft_limit: Duration,
    pub crypto: Duration,
    pub forex_open_intraday: Duration,
    pub forex_open_daily: Duration,
    pub forex_closed: Duration,
    pub forex_weekend: Duration,
    pub equity_intraday_open: Duration,
    pub equity_intraday_closed: Duration,
    pub equity_daily: Duration,
    pub equity_weekend: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            soft_limit: Duration::minutes(5),
            crypto: Duration::minutes(5),
            forex_open_intraday: Duration::minutes(5),
            forex_open_daily: Duration::minutes(15),
            forex_closed: Duration::hours(24),
            forex_weekend: Duration::hours(72),
            equity_intraday_open: Duration::minutes(5),
            equity_intraday_closed: Duration::minutes(15),
            equity_daily: Duration::hours(24),
            equity_weekend: Duration::hours(72),
        }
    }
}

pub struct FreshnessGate {
    config: FreshnessConfig,
}

impl FreshnessGate {
    pub fn new(config: FreshnessConfig) -> Self {
        Self { config }
    }

    fn hard_limit(
        &self,
        asset_class: AssetClass,
        session: SessionState,
        granularity: Granularity,
    ) -> Duration {
        let c = &self.config;
        match (asset_class, session, granularity) {
            (AssetClass::Crypto, _, _) => c.crypto,
            (AssetClass::Forex, SessionState::Open, Granularity::Intraday) => {
                c.forex_open_intraday
            }
            (AssetClass::Forex, SessionState::Open, Granularity::Daily) => c.forex_open_daily,
            (AssetClass::Forex, SessionState::Closed, _) => c.forex_closed,
            (AssetClass::Forex, SessionState::Weekend, _) => c.forex_weekend,
            (AssetClass::Equity, SessionState::Open, Granularity::Intraday) => {
                c.equity_intraday_open
            }
            (AssetClass::Equity, SessionState::Closed, Granularity::Intraday) => {
                c.equity_intraday_closed
            }
            (AssetClass::Equity, _, Granularity::Daily) => c.equity_daily,
            (AssetClass::Equity, SessionState::Weekend, Granularity::Intraday) => {
                c.equity_weekend
            }
        }
    }

    /// Check a quote's age. The hard limit is half-open on the upper bound:
    /// a quote exactly at the limit is stale.
    pub fn check(
        &self,
        quote: &Quote,
        asset_class: AssetClass,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> FreshnessVerdict {
        let age = quote.age(now);
        let limit = self.hard_limit(asset_class, quote.session, granularity);

        if age >= limit {
            FreshnessVerdict {
                fresh: false,
                age,
                limit,
                reason: FreshnessReason::Stale,
            }
        } else if age >= self.config.soft_limit {
            warn!(
                "FreshnessGate [{}]: quote age {}s approaching limit {}s",
                quote.symbol,
                age.num_seconds(),
                limit.num_seconds()
            );
            FreshnessVerdict {
                fresh: true,
                age,
                limit,
                reason: FreshnessReason::Warn,
            }
        } else {
            FreshnessVerdict {
                fresh: true,
                age,
                limit,
                reason: FreshnessReason::Fresh,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(age: Duration, session: SessionState, now: DateTime<Utc>) -> Quote {
        Quote {
            symbol: "EUR/USD".to_string(),
            bid: dec!(1.0850),
            ask: dec!(1.0852),
            timestamp: now - age,
            session,
        }
    }

    #[test]
    fn test_fresh_quote_passes() {
        let gate = FreshnessGate::new(FreshnessConfig::default());
        let now = Utc::now();
        let q = quote(Duration::seconds(30), SessionState::Open, now);

        let verdict = gate.check(&q, AssetClass::Forex, Granularity::Intraday, now);
        assert!(verdict.fresh);
        assert_eq!(verdict.reason, FreshnessReason::Fresh);
    }

    #[test]
    fn test_stale_forex_quote_during_open_session() {
        let gate = FreshnessGate::new(FreshnessConfig::default());
        let now = Utc::now();
        // 20 minutes old against a 5 minute intraday limit
        let q = quote(Duration::minutes(20), SessionState::Open, now);

        let verdict = gate.check(&q, AssetClass::Forex, Granularity::Intraday, now);
        assert!(!verdict.fresh);
        assert_eq!(verdict.reason, FreshnessReason::Stale);
        assert_eq!(verdict.limit, Duration::minutes(5));
    }

    #[test]
    fn test_exactly_at_limit_is_stale() {
        let gate = FreshnessGate::new(FreshnessConfig::default());
        let now = Utc::now();
        let q = quote(Duration::minutes(5), SessionState::Open, now);

        let verdict = gate.check(&q, AssetClass::Crypto, Granularity::Intraday, now);
        assert!(!verdict.fresh, "upper bound is half-open");
    }

    #[test]
    fn test_warn_band_between_soft_and_hard() {
        let gate = FreshnessGate::new(FreshnessConfig::default());
        let now = Utc::now();
        // 8 minutes: over the 5m soft limit, under the 15m daily forex limit
        let q = quote(Duration::minutes(8), SessionState::Open, now);

        let verdict = gate.check(&q, AssetClass::Forex, Granularity::Daily, now);
        assert!(verdict.fresh);
        assert_eq!(verdict.reason, FreshnessReason::Warn);
    }

    #[test]
    fn test_weekend_limits_are_relaxed() {
        let gate = FreshnessGate::new(FreshnessConfig::default());
        let now = Utc::now();
        let q = quote(Duration::hours(48), SessionState::Weekend, now);

        let verdict = gate.check(&q, AssetClass::Forex, Granularity::Intraday, now);
        assert!(verdict.fresh, "48h old forex quote is fine over the weekend");

        let q = quote(Duration::hours(80), SessionState::Weekend, now);
        let verdict = gate.check(&q, AssetClass::Forex, Granularity::Intraday, now);
        assert!(!verdict.fresh);
    }

    #[test]
    fn test_equity_closed_session_intraday() {
        let gate = FreshnessGate::new(FreshnessConfig::default());
        let now = Utc::now();
        let q = quote(Duration::minutes(10), SessionState::Closed, now);

        let verdict = gate.check(&q, AssetClass::Equity, Granularity::Intraday, now);
        assert!(verdict.fresh, "10m old equity quote ok after hours (15m limit)");
    }
}
