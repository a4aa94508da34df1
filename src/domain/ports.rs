use crate::domain::types::{
    Candle, Decision, Instrument, OracleStats, Position, Quote, Recommendation, TradeOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Market-data adapter surface. Implementations return structured quotes
/// with a provider timestamp; staleness is judged by the freshness gate,
/// never by the adapter.
#[async_trait]
pub trait DataProviderPort: Send + Sync {
    async fn quote(&self, instrument: &Instrument) -> Result<Quote>;
    async fn candles(&self, instrument: &Instrument, n: usize) -> Result<Vec<Candle>>;
}

/// Acknowledgement returned by the venue for a dispatched order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub filled_size: Decimal,
    pub fill_price: Decimal,
}

/// Exchange balances as reported by the venue. The venue is the source of
/// truth for balances and fills.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub equity: Decimal,
    pub cash: Decimal,
}

/// Full portfolio snapshot used by startup recovery.
#[derive(Debug, Clone)]
pub struct PortfolioBreakdown {
    pub balance: Balance,
    pub positions: Vec<Position>,
}

#[async_trait]
pub trait PlatformPort: Send + Sync {
    async fn balance(&self) -> Result<Balance>;
    async fn positions(&self) -> Result<Vec<Position>>;
    async fn portfolio_breakdown(&self) -> Result<PortfolioBreakdown>;

    /// Dispatch an order. `client_order_id` carries the decision id so a
    /// supporting venue can deduplicate server-side.
    #[allow(clippy::too_many_arguments)]
    async fn open(
        &self,
        instrument: &Instrument,
        side: crate::domain::types::PositionSide,
        size: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        client_order_id: &str,
    ) -> std::result::Result<OrderAck, crate::domain::errors::PlatformError>;

    async fn close(
        &self,
        position_id: &str,
    ) -> std::result::Result<(), crate::domain::errors::PlatformError>;
}

/// A single decision oracle (LLM, rule engine, heuristic).
#[async_trait]
pub trait DecisionProviderPort: Send + Sync {
    fn oracle_id(&self) -> &str;
    async fn query(&self, prompt: &str) -> Result<Recommendation>;
}

/// Acknowledgement of a signal-only publish. At least one transport must
/// ack at dispatch time or the execution fails loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub accepted: bool,
}

#[async_trait]
pub trait ApprovalTransportPort: Send + Sync {
    fn transport_id(&self) -> &str;
    async fn publish(&self, decision: &Decision) -> Result<PublishAck>;
}

/// Stored decision record with the embedding vector used for similarity
/// lookups.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub embedding: Vec<f64>,
}

/// Durable memory surface. Every write is atomic (temp + fsync + rename or
/// equivalent); the outcome log is append-only and keyed by position id.
#[async_trait]
pub trait MemoryStorePort: Send + Sync {
    /// Idempotent: re-putting an existing position id overwrites the same
    /// record file and must not duplicate the log.
    async fn put_outcome(&self, outcome: &TradeOutcome) -> Result<()>;
    async fn outcomes(&self) -> Result<Vec<TradeOutcome>>;

    async fn put_stats(&self, stats: &HashMap<String, OracleStats>) -> Result<()>;
    async fn stats(&self) -> Result<HashMap<String, OracleStats>>;

    async fn put_decision(&self, record: &DecisionRecord) -> Result<()>;
    /// Top-k prior decision records by cosine similarity against `query`.
    async fn similar(&self, k: usize, query: &[f64]) -> Result<Vec<DecisionRecord>>;
}
