//! Daily trade ledger.
//!
//! Owns the per-UTC-day execution counter (reset at midnight during
//! PERCEPTION) and per-instrument cooldowns after a fill. The coordinator
//! pre-increments the counter before dispatch and rolls it back when the
//! dispatch fails, so the daily cap never leaks on errors.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

struct LedgerInner {
    date: NaiveDate,
    trades_today: u32,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

pub struct TradeLedger {
    inner: Mutex<LedgerInner>,
}

impl TradeLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                date: now.date_naive(),
                trades_today: 0,
                cooldowns: HashMap::new(),
            }),
        }
    }

    pub async fn trades_today(&self) -> u32 {
        self.inner.lock().await.trades_today
    }

    /// Reserve one trade slot ahead of dispatch.
    pub async fn reserve(&self) -> u32 {
        let mut inner = self.inner.lock().await;
        inner.trades_today += 1;
        inner.trades_today
    }

    /// Undo a reservation whose dispatch failed.
    pub async fn rollback(&self) {
        let mut inner = self.inner.lock().await;
        inner.trades_today = inner.trades_today.saturating_sub(1);
    }

    /// Reset the counter when the UTC day rolled over. Returns true on
    /// rollover.
    pub async fn reset_if_new_day(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().await;
        let today = now.date_naive();
        if today != inner.date {
            info!(
                "TradeLedger: UTC day rollover {} -> {}, counter reset from {}",
                inner.date, today, inner.trades_today
            );
            inner.date = today;
            inner.trades_today = 0;
            inner.cooldowns.clear();
            return true;
        }
        false
    }

    /// Start a cooldown for a symbol after a successful execution.
    pub async fn start_cooldown(&self, symbol: &str, now: DateTime<Utc>, period: Duration) {
        let until = now + chrono::Duration::from_std(period).unwrap_or_default();
        self.inner
            .lock()
            .await
            .cooldowns
            .insert(symbol.to_string(), until);
    }

    pub async fn in_cooldown(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.inner
            .lock()
            .await
            .cooldowns
            .get(symbol)
            .is_some_and(|until| now < *until)
    }
}
