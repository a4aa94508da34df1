use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Crypto,
    Forex,
    Equity,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Forex => write!(f, "forex"),
            AssetClass::Equity => write!(f, "equity"),
        }
    }
}

impl std::str::FromStr for AssetClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" => Ok(AssetClass::Crypto),
            "forex" => Ok(AssetClass::Forex),
            "equity" | "stock" => Ok(AssetClass::Equity),
            _ => anyhow::bail!(
                "Invalid asset class: {}. Must be 'crypto', 'forex', or 'equity'",
                s
            ),
        }
    }
}

/// A tradable instrument. Immutable after creation; used as the routing key
/// throughout the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub venue: String,
}

impl Instrument {
    pub fn new(
        symbol: impl Into<String>,
        asset_class: AssetClass,
        venue: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
            venue: venue.into(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.venue)
    }
}

/// Market session state, derived per asset class by the session calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Open,
    Closed,
    Weekend,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Open => write!(f, "open"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Weekend => write!(f, "weekend"),
        }
    }
}

/// Quote granularity used by the freshness gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Intraday,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
    pub session: SessionState,
}

impl Quote {
    /// Mid price used as the decision entry reference.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    NoDecision,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Hold => write!(f, "HOLD"),
            TradeAction::NoDecision => write!(f, "NO_DECISION"),
        }
    }
}

/// Raw oracle output, prior to aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub oracle_id: String,
    pub action: TradeAction,
    /// Confidence in [0, 100].
    pub confidence: u8,
    pub reasoning: String,
    pub amount: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub produced_at: DateTime<Utc>,
}

impl Recommendation {
    /// An oracle response is valid iff confidence is within [0, 100] and the
    /// reasoning is non-empty.
    pub fn validate(&self) -> Result<(), String> {
        if self.confidence > 100 {
            return Err(format!(
                "confidence {} out of range [0, 100]",
                self.confidence
            ));
        }
        if self.reasoning.trim().is_empty() {
            return Err("empty reasoning".to_string());
        }
        Ok(())
    }
}

/// Rung of the aggregator ladder that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackTier {
    Primary,
    Majority,
    Average,
    Single,
}

impl fmt::Display for FallbackTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackTier::Primary => write!(f, "primary"),
            FallbackTier::Majority => write!(f, "majority"),
            FallbackTier::Average => write!(f, "average"),
            FallbackTier::Single => write!(f, "single"),
        }
    }
}

/// Provenance of the ensemble run that produced a decision.
///
/// `adjusted_weights` covers exactly the responding oracles and sums to
/// 1.0 within 1e-6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMeta {
    pub providers_used: Vec<String>,
    pub providers_failed: Vec<String>,
    pub original_weights: HashMap<String, f64>,
    pub adjusted_weights: HashMap<String, f64>,
    pub fallback_tier: FallbackTier,
    pub confidence_adjustment_factor: f64,
    pub quorum_met: bool,
}

impl EnsembleMeta {
    /// Empty meta for decisions that did not go through the ensemble
    /// (startup recovery records).
    pub fn recovery() -> Self {
        Self {
            providers_used: Vec::new(),
            providers_failed: Vec::new(),
            original_weights: HashMap::new(),
            adjusted_weights: HashMap::new(),
            fallback_tier: FallbackTier::Single,
            confidence_adjustment_factor: 1.0,
            quorum_met: false,
        }
    }
}

/// Where a decision came from. Recovery decisions are synthesized at startup
/// for positions found on the exchange, so provenance stays explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionOrigin {
    Live,
    Recovery,
}

/// Post-aggregation decision. Immutable; corrections are new decisions.
/// `id` doubles as the idempotency key for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub instrument: Instrument,
    pub action: TradeAction,
    pub confidence: u8,
    pub recommended_size: Option<Decimal>,
    pub entry: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub ensemble: EnsembleMeta,
    pub signal_only: bool,
    pub origin: DecisionOrigin,
    pub created_at: DateTime<Utc>,
}

/// Why an instrument produced no decision this cycle. Explicit variants so
/// callers cannot mistake "system cannot answer" for "market says hold".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NoDecisionReason {
    StaleData { age_secs: i64, limit_secs: i64 },
    QuorumNotMet { responding: usize, required: usize },
    AllProvidersFailed,
    /// The ensemble itself resolved to NO_DECISION.
    OraclesDeclined,
    CircuitOpen { service: String },
    MarketClosed { session: SessionState },
}

impl fmt::Display for NoDecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoDecisionReason::StaleData {
                age_secs,
                limit_secs,
            } => {
                write!(f, "stale data: age {}s > limit {}s", age_secs, limit_secs)
            }
            NoDecisionReason::QuorumNotMet {
                responding,
                required,
            } => {
                write!(f, "quorum not met: {}/{} oracles", responding, required)
            }
            NoDecisionReason::AllProvidersFailed => write!(f, "all providers failed"),
            NoDecisionReason::OraclesDeclined => write!(f, "oracles declined to decide"),
            NoDecisionReason::CircuitOpen { service } => {
                write!(f, "circuit open for {}", service)
            }
            NoDecisionReason::MarketClosed { session } => {
                write!(f, "market {}", session)
            }
        }
    }
}

/// Outcome of one REASONING pass over one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionOutcome {
    Actionable(Decision),
    NoDecision {
        symbol: String,
        reason: NoDecisionReason,
    },
}

impl DecisionOutcome {
    pub fn as_actionable(&self) -> Option<&Decision> {
        match self {
            DecisionOutcome::Actionable(d) => Some(d),
            DecisionOutcome::NoDecision { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// FNV-1a over the identifying tuple. Deliberately not the std hasher: the
/// key must be stable across restarts and Rust releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Stable position key: `hash(venue, symbol, side, entry_price)`.
///
/// Identifies the same exchange position across monitor restarts.
pub fn position_key(
    venue: &str,
    symbol: &str,
    side: PositionSide,
    entry_price: Decimal,
) -> String {
    let raw = format!("{}|{}|{}|{}", venue, symbol, side, entry_price.normalize());
    format!("{:016x}", fnv1a(raw.as_bytes()))
}

/// Stable fingerprint for configuration payloads (memory isolation roots).
pub fn config_fingerprint(serialized: &str) -> String {
    format!("{:016x}", fnv1a(serialized.as_bytes()))
}

/// An open (or closing) position as tracked by the monitor. Mutated only by
/// the PositionMonitor after it is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument: Instrument,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub peak_unrealised: Decimal,
    pub trough_unrealised: Decimal,
    pub state: PositionState,
}

impl Position {
    pub fn unrealised_pnl(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (price - self.entry_price) * self.size,
            PositionSide::Short => (self.entry_price - price) * self.size,
        }
    }
}

/// Why a position closed. Ordered by detection precedence:
/// explicit close > TP hit > SL hit > disappeared > timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Manual,
    TakeProfit,
    StopLoss,
    Disappeared,
    Timeout,
    Error,
}

impl ExitReason {
    /// Lower wins when two detections race for the same position.
    pub fn precedence(self) -> u8 {
        match self {
            ExitReason::Manual => 0,
            ExitReason::TakeProfit => 1,
            ExitReason::StopLoss => 2,
            ExitReason::Disappeared => 3,
            ExitReason::Timeout => 4,
            ExitReason::Error => 5,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Manual => write!(f, "manual"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::Disappeared => write!(f, "disappeared"),
            ExitReason::Timeout => write!(f, "timeout"),
            ExitReason::Error => write!(f, "error"),
        }
    }
}

/// Realised result of one closed position. Written exactly once; delivered
/// at-least-once and deduplicated by `position_id` downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_id: String,
    pub decision_id: Uuid,
    pub pnl: Decimal,
    pub pnl_pct: f64,
    pub duration_secs: i64,
    pub exit_reason: ExitReason,
    pub oracle_ids: Vec<String>,
    pub regime_tag: String,
    pub closed_at: DateTime<Utc>,
}

/// Per-oracle running record, updated monotonically from trade outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleStats {
    pub total: u64,
    pub wins: u64,
    pub losses: u64,
    pub avg_pnl: Decimal,
    pub ema_win_rate: f64,
}

impl Default for OracleStats {
    fn default() -> Self {
        Self {
            total: 0,
            wins: 0,
            losses: 0,
            avg_pnl: Decimal::ZERO,
            // Neutral prior until the first outcome lands
            ema_win_rate: 0.5,
        }
    }
}

/// Process-wide risk thresholds. Parsed and validated once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Running drawdown ceiling as a fraction of equity (e.g. 0.15).
    pub max_drawdown: f64,
    /// VaR ceiling as a fraction of equity.
    pub max_var_pct: f64,
    /// Max |exposure| per instrument as a fraction of equity.
    pub max_single_position: f64,
    /// Max number of held instruments correlated above the threshold.
    pub max_correlated: usize,
    pub correlation_threshold: f64,
    pub max_daily_trades: u32,
    /// Daily P&L floor (fraction of equity) that trips the kill switch.
    pub kill_switch_pct: f64,
}

/// Per-instrument failure tracker with time-window decay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentFault {
    pub failure_count: u32,
    pub last_failure: DateTime<Utc>,
}

impl AgentFault {
    pub fn record(fault: Option<AgentFault>, now: DateTime<Utc>, decay_window_secs: i64) -> Self {
        match fault {
            Some(f) if (now - f.last_failure).num_seconds() < decay_window_secs => AgentFault {
                failure_count: f.failure_count.saturating_add(1),
                last_failure: now,
            },
            // Window elapsed (or first failure): start over
            _ => AgentFault {
                failure_count: 1,
                last_failure: now,
            },
        }
    }

    /// Exponential backoff: an instrument with n failures is skipped until
    /// `base * 2^(n-1)` seconds after the last failure.
    pub fn backoff_until(&self, base_secs: i64) -> DateTime<Utc> {
        let exp = self.failure_count.saturating_sub(1).min(8);
        self.last_failure + chrono::Duration::seconds(base_secs << exp)
    }
}
