//! Feedback-weighted memory.
//!
//! Consumes trade outcomes (at-least-once delivery, deduplicated here by
//! position id), maintains EMA-weighted per-oracle statistics, and serves
//! the aggregator a context of similar past decisions, learned oracle
//! weights, and a regime tag. Reads never touch the store: they hit an
//! immutable snapshot that is swapped in atomically after each write.

use crate::domain::ports::{DecisionRecord, MemoryStorePort};
use crate::domain::types::{Decision, Instrument, OracleStats, Position, TradeOutcome};
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// EMA smoothing for oracle win rates.
    pub ema_alpha: f64,
    /// Weights never drop below this, so one losing streak cannot fully
    /// deprecate an oracle. Must be positive.
    pub weight_floor: f64,
    /// How many similar past decisions the context carries.
    pub similar_k: usize,
    /// Outcomes considered for the regime tag.
    pub regime_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            weight_floor: 0.05,
            similar_k: 5,
            regime_window: 10,
        }
    }
}

/// What REASONING reads at entry.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    pub similar_past: Vec<DecisionRecord>,
    pub oracle_weights: HashMap<String, f64>,
    pub regime_tag: String,
}

/// Immutable view swapped after each write.
#[derive(Debug, Default)]
struct Snapshot {
    stats: HashMap<String, OracleStats>,
    seen_positions: HashSet<String>,
    open_positions: HashMap<String, Position>,
    recent_outcomes: Vec<TradeOutcome>,
}

pub struct MemoryEngine {
    store: Arc<dyn MemoryStorePort>,
    config: MemoryConfig,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serialises the write path; readers never take it.
    write_gate: Mutex<()>,
}

fn regime_tag(recent: &[TradeOutcome]) -> String {
    if recent.is_empty() {
        return "unknown".to_string();
    }
    let wins = recent.iter().filter(|o| o.pnl > Decimal::ZERO).count();
    let ratio = wins as f64 / recent.len() as f64;
    if ratio >= 0.6 {
        "favorable".to_string()
    } else if ratio <= 0.4 {
        "adverse".to_string()
    } else {
        "mixed".to_string()
    }
}

/// Fixed-width feature vector for the similarity index.
pub fn embed_decision(decision: &Decision) -> Vec<f64> {
    use crate::domain::types::{AssetClass, TradeAction};

    let mut v = vec![0.0; 9];
    match decision.action {
        TradeAction::Buy => v[0] = 1.0,
        TradeAction::Sell => v[1] = 1.0,
        TradeAction::Hold => v[2] = 1.0,
        TradeAction::NoDecision => v[3] = 1.0,
    }
    v[4] = f64::from(decision.confidence) / 100.0;
    v[5] = if decision.signal_only { 1.0 } else { 0.0 };
    match decision.instrument.asset_class {
        AssetClass::Crypto => v[6] = 1.0,
        AssetClass::Forex => v[7] = 1.0,
        AssetClass::Equity => v[8] = 1.0,
    }
    v
}

/// Neutral query vector for an instrument, used before any decision exists
/// this cycle.
pub fn embed_query(instrument: &Instrument) -> Vec<f64> {
    use crate::domain::types::AssetClass;

    let mut v = vec![0.0; 9];
    v[4] = 0.5;
    match instrument.asset_class {
        AssetClass::Crypto => v[6] = 1.0,
        AssetClass::Forex => v[7] = 1.0,
        AssetClass::Equity => v[8] = 1.0,
    }
    v
}

impl MemoryEngine {
    /// Load the snapshot from the store. A missing or stale stats record
    /// is rebuilt from the authoritative outcome log.
    pub async fn load(store: Arc<dyn MemoryStorePort>, config: MemoryConfig) -> Result<Self> {
        let outcomes = store.outcomes().await?;
        let mut stats = store.stats().await?;

        if stats.is_empty() && !outcomes.is_empty() {
            info!(
                "MemoryEngine: rebuilding oracle stats from {} logged outcomes",
                outcomes.len()
            );
            for outcome in &outcomes {
                Self::fold_outcome(&mut stats, outcome, config.ema_alpha);
            }
            store.put_stats(&stats).await?;
        }

        let seen_positions = outcomes.iter().map(|o| o.position_id.clone()).collect();
        let recent_outcomes = outcomes
            .iter()
            .rev()
            .take(config.regime_window)
            .rev()
            .cloned()
            .collect();

        Ok(Self {
            store,
            config,
            snapshot: RwLock::new(Arc::new(Snapshot {
                stats,
                seen_positions,
                open_positions: HashMap::new(),
                recent_outcomes,
            })),
            write_gate: Mutex::new(()),
        })
    }

    fn read(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, next: Snapshot) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Arc::new(next),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(next),
        }
    }

    fn fold_outcome(stats: &mut HashMap<String, OracleStats>, outcome: &TradeOutcome, alpha: f64) {
        let win = outcome.pnl > Decimal::ZERO;
        for oracle_id in &outcome.oracle_ids {
            let entry = stats.entry(oracle_id.clone()).or_default();
            entry.total += 1;
            if win {
                entry.wins += 1;
            } else {
                entry.losses += 1;
            }
            // Cumulative mean keeps avg_pnl monotone in outcome count
            let n = Decimal::from(entry.total);
            entry.avg_pnl += (outcome.pnl - entry.avg_pnl) / n;
            let x = if win { 1.0 } else { 0.0 };
            entry.ema_win_rate = alpha * x + (1.0 - alpha) * entry.ema_win_rate;
        }
    }

    /// Record a closed trade. Duplicate deliveries (same position id) are
    /// no-ops; returns whether the outcome was newly recorded.
    pub async fn record_outcome(&self, outcome: &TradeOutcome) -> Result<bool> {
        let _gate = self.write_gate.lock().await;

        let current = self.read();
        if current.seen_positions.contains(&outcome.position_id) {
            debug!(
                "MemoryEngine: duplicate outcome for position {} ignored",
                outcome.position_id
            );
            return Ok(false);
        }

        let mut stats = current.stats.clone();
        Self::fold_outcome(&mut stats, outcome, self.config.ema_alpha);

        // Log first: it is the source of truth the snapshot rebuilds from
        self.store.put_outcome(outcome).await?;
        self.store.put_stats(&stats).await?;

        let mut seen = current.seen_positions.clone();
        seen.insert(outcome.position_id.clone());
        let mut open = current.open_positions.clone();
        open.remove(&outcome.position_id);
        let mut recent = current.recent_outcomes.clone();
        recent.push(outcome.clone());
        let overflow = recent.len().saturating_sub(self.config.regime_window);
        if overflow > 0 {
            recent.drain(..overflow);
        }

        self.swap(Snapshot {
            stats,
            seen_positions: seen,
            open_positions: open,
            recent_outcomes: recent,
        });

        info!(
            "MemoryEngine: recorded outcome for position {} ({} via {})",
            outcome.position_id, outcome.pnl, outcome.exit_reason
        );
        Ok(true)
    }

    /// Track a newly observed open position (monitor detection or startup
    /// recovery).
    pub async fn register_open(&self, position: &Position) {
        let _gate = self.write_gate.lock().await;
        let current = self.read();
        let mut open = current.open_positions.clone();
        open.insert(position.id.clone(), position.clone());
        self.swap(Snapshot {
            stats: current.stats.clone(),
            seen_positions: current.seen_positions.clone(),
            open_positions: open,
            recent_outcomes: current.recent_outcomes.clone(),
        });
    }

    /// Persist a decision into the similarity index.
    pub async fn record_decision(&self, decision: &Decision) -> Result<()> {
        let record = DecisionRecord {
            decision: decision.clone(),
            embedding: embed_decision(decision),
        };
        self.store.put_decision(&record).await
    }

    /// Clamped EMA weights for the aggregator.
    pub fn oracle_weights(&self) -> HashMap<String, f64> {
        let snapshot = self.read();
        snapshot
            .stats
            .iter()
            .map(|(id, s)| {
                (
                    id.clone(),
                    s.ema_win_rate.clamp(self.config.weight_floor, 1.0),
                )
            })
            .collect()
    }

    pub fn open_position_count(&self) -> usize {
        self.read().open_positions.len()
    }

    pub fn stats_for(&self, oracle_id: &str) -> Option<OracleStats> {
        self.read().stats.get(oracle_id).cloned()
    }

    /// Context handed to REASONING for one instrument.
    pub async fn context(&self, instrument: &Instrument) -> MemoryContext {
        let snapshot = self.read();
        let similar_past = match self
            .store
            .similar(self.config.similar_k, &embed_query(instrument))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("MemoryEngine: similarity lookup failed: {:#}", e);
                Vec::new()
            }
        };

        MemoryContext {
            similar_past,
            oracle_weights: self.oracle_weights(),
            regime_tag: regime_tag(&snapshot.recent_outcomes),
        }
    }

    /// Average daily pnl helper used by the status surface.
    pub fn recent_pnl(&self) -> Decimal {
        self.read()
            .recent_outcomes
            .iter()
            .map(|o| o.pnl)
            .sum::<Decimal>()
    }

    /// True once this position's outcome has been recorded.
    pub fn has_outcome(&self, position_id: &str) -> bool {
        self.read().seen_positions.contains(position_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AssetClass, ExitReason, PositionSide, PositionState};
    use crate::infrastructure::persistence::FileMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn engine_with_store() -> (MemoryEngine, std::path::PathBuf) {
        let base = std::env::temp_dir().join(format!("qt-memory-{}", Uuid::new_v4()));
        let store = Arc::new(FileMemoryStore::open(&base, None).await.unwrap());
        let engine = MemoryEngine::load(store, MemoryConfig::default())
            .await
            .unwrap();
        (engine, base)
    }

    fn outcome(position_id: &str, pnl: Decimal, oracles: &[&str]) -> TradeOutcome {
        TradeOutcome {
            position_id: position_id.to_string(),
            decision_id: Uuid::new_v4(),
            pnl,
            pnl_pct: 0.01,
            duration_secs: 600,
            exit_reason: ExitReason::TakeProfit,
            oracle_ids: oracles.iter().map(|s| s.to_string()).collect(),
            regime_tag: "mixed".to_string(),
            closed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_outcome_dedup_by_position_id() {
        let (engine, base) = engine_with_store().await;

        assert!(engine
            .record_outcome(&outcome("pos-1", dec!(50), &["claude"]))
            .await
            .unwrap());
        assert!(!engine
            .record_outcome(&outcome("pos-1", dec!(50), &["claude"]))
            .await
            .unwrap());

        let stats = engine.stats_for("claude").unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.wins, 1);

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_ema_win_rate_update() {
        let (engine, base) = engine_with_store().await;

        engine
            .record_outcome(&outcome("p1", dec!(10), &["claude"]))
            .await
            .unwrap();
        // From the 0.5 prior: 0.1 * 1.0 + 0.9 * 0.5 = 0.55
        let after_win = engine.stats_for("claude").unwrap().ema_win_rate;
        assert!((after_win - 0.55).abs() < 1e-9);

        engine
            .record_outcome(&outcome("p2", dec!(-10), &["claude"]))
            .await
            .unwrap();
        // 0.1 * 0.0 + 0.9 * 0.55 = 0.495
        let after_loss = engine.stats_for("claude").unwrap().ema_win_rate;
        assert!((after_loss - 0.495).abs() < 1e-9);

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_weights_clamped_at_floor() {
        let (engine, base) = engine_with_store().await;

        // Hammer one oracle with losses; its weight must not hit zero
        for i in 0..50 {
            engine
                .record_outcome(&outcome(&format!("p{}", i), dec!(-5), &["cold"]))
                .await
                .unwrap();
        }

        let weights = engine.oracle_weights();
        assert!(weights["cold"] >= 0.05);

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_stats_rebuilt_from_log_on_load() {
        let base = std::env::temp_dir().join(format!("qt-memory-{}", Uuid::new_v4()));
        let store = Arc::new(FileMemoryStore::open(&base, None).await.unwrap());

        {
            let engine = MemoryEngine::load(Arc::clone(&store) as Arc<dyn MemoryStorePort>, MemoryConfig::default())
                .await
                .unwrap();
            engine
                .record_outcome(&outcome("p1", dec!(25), &["claude", "rules"]))
                .await
                .unwrap();
        }

        // Simulate a lost stats snapshot: the log alone must restore it
        std::fs::remove_file(base.join("stats.json")).unwrap();
        let reopened_store = Arc::new(FileMemoryStore::open(&base, None).await.unwrap());
        let engine = MemoryEngine::load(reopened_store, MemoryConfig::default())
            .await
            .unwrap();

        let stats = engine.stats_for("rules").unwrap();
        assert_eq!(stats.total, 1);
        assert!(engine.has_outcome("p1"));

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_regime_tag_tracks_recent_outcomes() {
        let (engine, base) = engine_with_store().await;
        let instrument = Instrument::new("BTC/USD", AssetClass::Crypto, "binance");

        assert_eq!(engine.context(&instrument).await.regime_tag, "unknown");

        for i in 0..5 {
            engine
                .record_outcome(&outcome(&format!("w{}", i), dec!(10), &["claude"]))
                .await
                .unwrap();
        }
        assert_eq!(engine.context(&instrument).await.regime_tag, "favorable");

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_register_open_visible_in_count() {
        let (engine, base) = engine_with_store().await;
        let position = Position {
            id: "p-open".to_string(),
            instrument: Instrument::new("ETH/USD", AssetClass::Crypto, "binance"),
            side: PositionSide::Long,
            entry_price: dec!(3000),
            size: dec!(1),
            opened_at: Utc::now(),
            stop_loss: None,
            take_profit: None,
            peak_unrealised: Decimal::ZERO,
            trough_unrealised: Decimal::ZERO,
            state: PositionState::Open,
        };

        engine.register_open(&position).await;
        assert_eq!(engine.open_position_count(), 1);

        // Closing it via an outcome removes it from the open set
        engine
            .record_outcome(&outcome("p-open", dec!(5), &["claude"]))
            .await
            .unwrap();
        assert_eq!(engine.open_position_count(), 0);

        std::fs::remove_dir_all(&base).unwrap();
    }
}
