//! Deterministic in-memory adapters for every port.
//!
//! Used by the `mock` run mode and throughout the test suites. All mocks
//! are `Clone` and share interior state through `Arc`, so a test can keep a
//! handle and mutate the scripted world while the agent runs.

use crate::domain::errors::PlatformError;
use crate::domain::ports::{
    ApprovalTransportPort, Balance, DataProviderPort, DecisionProviderPort, OrderAck,
    PlatformPort, PortfolioBreakdown, PublishAck,
};
use crate::domain::session::session_state;
use crate::domain::types::{
    position_key, Candle, Decision, Instrument, Position, PositionSide, PositionState, Quote,
    Recommendation, TradeAction,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Scripted market data. Quotes default to "now" so they pass freshness
/// unless a test explicitly ages them.
#[derive(Clone, Default)]
pub struct MockDataProvider {
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    failing: Arc<RwLock<bool>>,
}

impl MockDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_quote(&self, quote: Quote) {
        self.quotes.write().await.insert(quote.symbol.clone(), quote);
    }

    pub async fn set_price(&self, instrument: &Instrument, price: Decimal) {
        let now = Utc::now();
        self.set_quote(Quote {
            symbol: instrument.symbol.clone(),
            bid: price,
            ask: price,
            timestamp: now,
            session: session_state(instrument.asset_class, now),
        })
        .await;
    }

    /// Make every call fail until reset; exercises the data breaker.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }
}

#[async_trait]
impl DataProviderPort for MockDataProvider {
    async fn quote(&self, instrument: &Instrument) -> Result<Quote> {
        if *self.failing.read().await {
            return Err(anyhow!("mock data provider outage"));
        }
        self.quotes
            .read()
            .await
            .get(&instrument.symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no quote scripted for {}", instrument.symbol))
    }

    async fn candles(&self, instrument: &Instrument, n: usize) -> Result<Vec<Candle>> {
        let quote = self.quote(instrument).await?;
        // Flat synthetic history is enough for the volatility fallback path
        Ok((0..n)
            .map(|i| Candle {
                symbol: instrument.symbol.clone(),
                open: quote.mid(),
                high: quote.ask,
                low: quote.bid,
                close: quote.mid(),
                volume: Decimal::ONE,
                timestamp: quote.timestamp - chrono::Duration::minutes(i as i64),
            })
            .collect())
    }
}

/// In-memory exchange. Fills instantly at the decision entry price and
/// keeps a call log so tests can assert the venue was (not) touched.
#[derive(Clone)]
pub struct MockPlatform {
    equity: Arc<RwLock<Decimal>>,
    cash: Arc<RwLock<Decimal>>,
    positions: Arc<RwLock<HashMap<String, Position>>>,
    fill_prices: Arc<RwLock<HashMap<String, Decimal>>>,
    open_calls: Arc<AtomicUsize>,
    fail_next_open: Arc<RwLock<Option<PlatformError>>>,
    seen_client_order_ids: Arc<RwLock<Vec<String>>>,
}

impl MockPlatform {
    pub fn new(equity: Decimal) -> Self {
        Self {
            equity: Arc::new(RwLock::new(equity)),
            cash: Arc::new(RwLock::new(equity)),
            positions: Arc::new(RwLock::new(HashMap::new())),
            fill_prices: Arc::new(RwLock::new(HashMap::new())),
            open_calls: Arc::new(AtomicUsize::new(0)),
            fail_next_open: Arc::new(RwLock::new(None)),
            seen_client_order_ids: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_equity(&self, equity: Decimal) {
        *self.equity.write().await = equity;
    }

    /// Script the fill price for a symbol; orders fill instantly at it.
    pub async fn set_fill_price(&self, symbol: &str, price: Decimal) {
        self.fill_prices
            .write()
            .await
            .insert(symbol.to_string(), price);
    }

    /// Script the next `open` call to fail with `err` (consumed once).
    pub async fn fail_next_open(&self, err: PlatformError) {
        *self.fail_next_open.write().await = Some(err);
    }

    pub fn open_call_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub async fn client_order_ids(&self) -> Vec<String> {
        self.seen_client_order_ids.read().await.clone()
    }

    /// Drop a position from the snapshot, as if it was closed venue-side.
    pub async fn remove_position(&self, position_id: &str) -> Option<Position> {
        self.positions.write().await.remove(position_id)
    }

    pub async fn insert_position(&self, position: Position) {
        self.positions
            .write()
            .await
            .insert(position.id.clone(), position);
    }
}

#[async_trait]
impl PlatformPort for MockPlatform {
    async fn balance(&self) -> Result<Balance> {
        Ok(Balance {
            equity: *self.equity.read().await,
            cash: *self.cash.read().await,
        })
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn portfolio_breakdown(&self) -> Result<PortfolioBreakdown> {
        Ok(PortfolioBreakdown {
            balance: self.balance().await?,
            positions: self.positions().await?,
        })
    }

    async fn open(
        &self,
        instrument: &Instrument,
        side: PositionSide,
        size: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        client_order_id: &str,
    ) -> std::result::Result<OrderAck, PlatformError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_client_order_ids
            .write()
            .await
            .push(client_order_id.to_string());

        if let Some(err) = self.fail_next_open.write().await.take() {
            return Err(err);
        }

        let fill_price = self
            .fill_prices
            .read()
            .await
            .get(&instrument.symbol)
            .copied()
            .unwrap_or(Decimal::ONE);

        let id = position_key(&instrument.venue, &instrument.symbol, side, fill_price);
        let position = Position {
            id: id.clone(),
            instrument: instrument.clone(),
            side,
            entry_price: fill_price,
            size,
            opened_at: Utc::now(),
            stop_loss,
            take_profit,
            peak_unrealised: Decimal::ZERO,
            trough_unrealised: Decimal::ZERO,
            state: PositionState::Open,
        };
        self.positions.write().await.insert(id.clone(), position);

        Ok(OrderAck {
            order_id: format!("mock-{}", self.open_calls.load(Ordering::SeqCst)),
            client_order_id: client_order_id.to_string(),
            filled_size: size,
            fill_price,
        })
    }

    async fn close(&self, position_id: &str) -> std::result::Result<(), PlatformError> {
        let removed = self.positions.write().await.remove(position_id);
        match removed {
            Some(_) => Ok(()),
            None => Err(PlatformError::PositionNotFound {
                position_id: position_id.to_string(),
            }),
        }
    }
}

/// Scripted oracle. Answers with a fixed recommendation, an error, or a
/// delayed response to exercise timeouts.
pub struct MockOracle {
    id: String,
    response: RwLock<OracleScript>,
    calls: AtomicUsize,
}

enum OracleScript {
    Answer(Recommendation),
    Fail(String),
    Delay(Duration, Recommendation),
}

impl MockOracle {
    pub fn answering(id: &str, action: TradeAction, confidence: u8) -> Self {
        Self {
            id: id.to_string(),
            response: RwLock::new(OracleScript::Answer(Self::recommendation(
                id, action, confidence,
            ))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(id: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            response: RwLock::new(OracleScript::Fail(reason.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(id: &str, delay: Duration, action: TradeAction, confidence: u8) -> Self {
        Self {
            id: id.to_string(),
            response: RwLock::new(OracleScript::Delay(
                delay,
                Self::recommendation(id, action, confidence),
            )),
            calls: AtomicUsize::new(0),
        }
    }

    /// A recommendation that deliberately fails validation.
    pub fn invalid(id: &str) -> Self {
        let mut rec = Self::recommendation(id, TradeAction::Buy, 50);
        rec.reasoning = String::new();
        Self {
            id: id.to_string(),
            response: RwLock::new(OracleScript::Answer(rec)),
            calls: AtomicUsize::new(0),
        }
    }

    fn recommendation(id: &str, action: TradeAction, confidence: u8) -> Recommendation {
        Recommendation {
            oracle_id: id.to_string(),
            action,
            confidence,
            reasoning: format!("{} scripted response", id),
            amount: None,
            stop_loss: None,
            take_profit: None,
            produced_at: Utc::now(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionProviderPort for MockOracle {
    fn oracle_id(&self) -> &str {
        &self.id
    }

    async fn query(&self, _prompt: &str) -> Result<Recommendation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.response.read().await;
        match &*script {
            OracleScript::Answer(rec) => Ok(rec.clone()),
            OracleScript::Fail(reason) => Err(anyhow!("{}", reason.clone())),
            OracleScript::Delay(delay, rec) => {
                let (delay, rec) = (*delay, rec.clone());
                drop(script);
                tokio::time::sleep(delay).await;
                Ok(rec)
            }
        }
    }
}

/// Approval transport that records published decisions.
#[derive(Clone)]
pub struct MockApprovalTransport {
    id: String,
    acking: Arc<RwLock<bool>>,
    published: Arc<RwLock<Vec<Decision>>>,
}

impl MockApprovalTransport {
    pub fn new(id: &str, acking: bool) -> Self {
        Self {
            id: id.to_string(),
            acking: Arc::new(RwLock::new(acking)),
            published: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn published(&self) -> Vec<Decision> {
        self.published.read().await.clone()
    }

    pub async fn set_acking(&self, acking: bool) {
        *self.acking.write().await = acking;
    }
}

#[async_trait]
impl ApprovalTransportPort for MockApprovalTransport {
    fn transport_id(&self) -> &str {
        &self.id
    }

    async fn publish(&self, decision: &Decision) -> Result<PublishAck> {
        let accepted = *self.acking.read().await;
        if accepted {
            self.published.write().await.push(decision.clone());
        }
        Ok(PublishAck { accepted })
    }
}
