//! UTC session calendar.
//!
//! Derives the market session state per asset class from a wall-clock
//! instant. Crypto never closes; forex pauses over the weekend roll; equity
//! follows the US cash session.

use crate::domain::types::{AssetClass, SessionState};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

/// Forex weekend: Friday 22:00 UTC through Sunday 21:00 UTC.
fn forex_session(ts: DateTime<Utc>) -> SessionState {
    let minutes = ts.hour() * 60 + ts.minute();
    match ts.weekday() {
        Weekday::Sat => SessionState::Weekend,
        Weekday::Fri if minutes >= 22 * 60 => SessionState::Weekend,
        Weekday::Sun if minutes < 21 * 60 => SessionState::Weekend,
        _ => SessionState::Open,
    }
}

/// US cash session, 14:30-21:00 UTC Monday-Friday.
fn equity_session(ts: DateTime<Utc>) -> SessionState {
    match ts.weekday() {
        Weekday::Sat | Weekday::Sun => SessionState::Weekend,
        _ => {
            let minutes = ts.hour() * 60 + ts.minute();
            if (14 * 60 + 30..21 * 60).contains(&minutes) {
                SessionState::Open
            } else {
                SessionState::Closed
            }
        }
    }
}

pub fn session_state(asset_class: AssetClass, ts: DateTime<Utc>) -> SessionState {
    match asset_class {
        AssetClass::Crypto => SessionState::Open,
        AssetClass::Forex => forex_session(ts),
        AssetClass::Equity => equity_session(ts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_crypto_always_open() {
        // Saturday 03:00 UTC
        let ts = Utc.with_ymd_and_hms(2025, 6, 14, 3, 0, 0).unwrap();
        assert_eq!(session_state(AssetClass::Crypto, ts), SessionState::Open);
    }

    #[test]
    fn test_forex_weekend_roll() {
        // Friday 21:59 UTC - still open
        let friday_late = Utc.with_ymd_and_hms(2025, 6, 13, 21, 59, 0).unwrap();
        assert_eq!(
            session_state(AssetClass::Forex, friday_late),
            SessionState::Open
        );

        // Friday 22:00 UTC - weekend starts
        let friday_close = Utc.with_ymd_and_hms(2025, 6, 13, 22, 0, 0).unwrap();
        assert_eq!(
            session_state(AssetClass::Forex, friday_close),
            SessionState::Weekend
        );

        // Sunday 20:59 UTC - still weekend
        let sunday_early = Utc.with_ymd_and_hms(2025, 6, 15, 20, 59, 0).unwrap();
        assert_eq!(
            session_state(AssetClass::Forex, sunday_early),
            SessionState::Weekend
        );

        // Sunday 21:00 UTC - reopened
        let sunday_open = Utc.with_ymd_and_hms(2025, 6, 15, 21, 0, 0).unwrap();
        assert_eq!(
            session_state(AssetClass::Forex, sunday_open),
            SessionState::Open
        );
    }

    #[test]
    fn test_equity_cash_session() {
        // Wednesday 15:00 UTC - open
        let midday = Utc.with_ymd_and_hms(2025, 6, 11, 15, 0, 0).unwrap();
        assert_eq!(session_state(AssetClass::Equity, midday), SessionState::Open);

        // Wednesday 13:00 UTC - pre-market
        let premarket = Utc.with_ymd_and_hms(2025, 6, 11, 13, 0, 0).unwrap();
        assert_eq!(
            session_state(AssetClass::Equity, premarket),
            SessionState::Closed
        );

        // Wednesday 21:00 UTC - closed (half-open upper bound)
        let close = Utc.with_ymd_and_hms(2025, 6, 11, 21, 0, 0).unwrap();
        assert_eq!(
            session_state(AssetClass::Equity, close),
            SessionState::Closed
        );

        // Saturday - weekend
        let saturday = Utc.with_ymd_and_hms(2025, 6, 14, 15, 0, 0).unwrap();
        assert_eq!(
            session_state(AssetClass::Equity, saturday),
            SessionState::Weekend
        );
    }
}
