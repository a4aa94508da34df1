//! File-backed memory store.
//!
//! Layout under the storage root:
//!
//! ```text
//! outcomes/<position_id>.json   append-only outcome log, one record per file
//! decisions/<decision_id>.json  decision store + embedding index
//! stats.json                    versioned oracle stats snapshot
//! ```
//!
//! The outcome log is the source of truth; the stats snapshot is a derived
//! cache stamped with the outcome count it was computed from, so a crash
//! between the log write and the stats write leaves a snapshot the engine
//! detects as behind and rebuilds from the log. Every write goes through
//! the atomic temp+fsync+rename path; the log+stats pair additionally
//! takes the root write lock. Single-record decision writes need neither.

use crate::domain::ports::{DecisionRecord, MemoryStorePort};
use crate::domain::types::{OracleStats, TradeOutcome};
use crate::infrastructure::persistence::atomic::{
    atomic_write_json, read_json, sweep_stale, WriteLock,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

const STATS_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StatsRecord {
    version: u32,
    /// Outcome-log length this snapshot was derived from.
    outcome_count: usize,
    stats: HashMap<String, OracleStats>,
}

fn count_records(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if entry?.path().extension().and_then(|e| e.to_str()) == Some("json") {
            count += 1;
        }
    }
    Ok(count)
}

pub struct FileMemoryStore {
    root: PathBuf,
    /// In-memory mirror of the decision store for similarity lookups.
    index: RwLock<Vec<DecisionRecord>>,
}

impl FileMemoryStore {
    /// Open (or create) a store root. When `isolation_suffix` is set the
    /// root is namespaced, so simulation runs can never share records with
    /// a live run. Enforced here, once, not per call.
    pub async fn open(base_root: &Path, isolation_suffix: Option<&str>) -> Result<Self> {
        let root = match isolation_suffix {
            Some(suffix) => base_root.join(format!("sim-{}", suffix)),
            None => base_root.to_path_buf(),
        };

        let init_root = root.clone();
        let index = tokio::task::spawn_blocking(move || -> Result<Vec<DecisionRecord>> {
            fs::create_dir_all(init_root.join("outcomes"))?;
            fs::create_dir_all(init_root.join("decisions"))?;
            sweep_stale(&init_root)?;

            let mut index = Vec::new();
            for entry in fs::read_dir(init_root.join("decisions"))? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    index.push(read_json::<DecisionRecord>(&path)?);
                }
            }
            Ok(index)
        })
        .await
        .context("store init task panicked")??;

        info!(
            "FileMemoryStore: opened {} ({} prior decisions)",
            root.display(),
            index.len()
        );

        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn outcome_path(&self, position_id: &str) -> PathBuf {
        self.root.join("outcomes").join(format!("{}.json", position_id))
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl MemoryStorePort for FileMemoryStore {
    async fn put_outcome(&self, outcome: &TradeOutcome) -> Result<()> {
        let path = self.outcome_path(&outcome.position_id);
        let root = self.root.clone();
        let outcome = outcome.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = WriteLock::acquire(&root)?;
            atomic_write_json(&path, &outcome)
        })
        .await
        .context("outcome write task panicked")?
    }

    async fn outcomes(&self) -> Result<Vec<TradeOutcome>> {
        let dir = self.root.join("outcomes");
        tokio::task::spawn_blocking(move || -> Result<Vec<TradeOutcome>> {
            let mut out = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    out.push(read_json::<TradeOutcome>(&path)?);
                }
            }
            out.sort_by_key(|o| o.closed_at);
            Ok(out)
        })
        .await
        .context("outcome read task panicked")?
    }

    async fn put_stats(&self, stats: &HashMap<String, OracleStats>) -> Result<()> {
        let path = self.root.join("stats.json");
        let root = self.root.clone();
        let stats = stats.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = WriteLock::acquire(&root)?;
            let record = StatsRecord {
                version: STATS_VERSION,
                outcome_count: count_records(&root.join("outcomes"))?,
                stats,
            };
            atomic_write_json(&path, &record)
        })
        .await
        .context("stats write task panicked")?
    }

    async fn stats(&self) -> Result<HashMap<String, OracleStats>> {
        let path = self.root.join("stats.json");
        let outcomes_dir = self.root.join("outcomes");
        tokio::task::spawn_blocking(move || -> Result<HashMap<String, OracleStats>> {
            if !path.exists() {
                return Ok(HashMap::new());
            }
            let record: StatsRecord = read_json(&path)?;
            // A schema change or a crash between the log write and the
            // stats write leaves the snapshot behind the log; report it
            // as absent so the engine rebuilds from the source of truth
            if record.version != STATS_VERSION
                || record.outcome_count != count_records(&outcomes_dir)?
            {
                return Ok(HashMap::new());
            }
            Ok(record.stats)
        })
        .await
        .context("stats read task panicked")?
    }

    async fn put_decision(&self, record: &DecisionRecord) -> Result<()> {
        let path = self
            .root
            .join("decisions")
            .join(format!("{}.json", record.decision.id));
        let to_write = record.clone();
        tokio::task::spawn_blocking(move || atomic_write_json(&path, &to_write))
            .await
            .context("decision write task panicked")??;

        let mut index = self.index.write().await;
        index.retain(|r| r.decision.id != record.decision.id);
        index.push(record.clone());
        Ok(())
    }

    async fn similar(&self, k: usize, query: &[f64]) -> Result<Vec<DecisionRecord>> {
        let index = self.index.read().await;
        let mut scored: Vec<(f64, &DecisionRecord)> = index
            .iter()
            .map(|r| (cosine_similarity(&r.embedding, query), r))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, r)| r.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{
        AssetClass, Decision, DecisionOrigin, EnsembleMeta, ExitReason, Instrument, TradeAction,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn temp_base(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("qt-store-{}-{}", tag, Uuid::new_v4()))
    }

    fn outcome(position_id: &str, pnl: i64) -> TradeOutcome {
        TradeOutcome {
            position_id: position_id.to_string(),
            decision_id: Uuid::new_v4(),
            pnl: Decimal::from(pnl),
            pnl_pct: pnl as f64 / 100.0,
            duration_secs: 3600,
            exit_reason: ExitReason::TakeProfit,
            oracle_ids: vec!["claude".to_string()],
            regime_tag: "trending_up".to_string(),
            closed_at: Utc::now(),
        }
    }

    use rust_decimal::Decimal;

    fn decision_record(embedding: Vec<f64>) -> DecisionRecord {
        DecisionRecord {
            decision: Decision {
                id: Uuid::new_v4(),
                instrument: Instrument::new("BTC/USD", AssetClass::Crypto, "binance"),
                action: TradeAction::Buy,
                confidence: 70,
                recommended_size: Some(dec!(0.5)),
                entry: dec!(50000),
                stop_loss: Some(dec!(49000)),
                take_profit: Some(dec!(52000)),
                ensemble: EnsembleMeta::recovery(),
                signal_only: false,
                origin: DecisionOrigin::Live,
                created_at: Utc::now(),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_outcome_put_is_idempotent_by_position_id() {
        let base = temp_base("dedup");
        let store = FileMemoryStore::open(&base, None).await.unwrap();

        store.put_outcome(&outcome("pos-1", 100)).await.unwrap();
        store.put_outcome(&outcome("pos-1", 100)).await.unwrap();
        store.put_outcome(&outcome("pos-2", -50)).await.unwrap();

        let all = store.outcomes().await.unwrap();
        assert_eq!(all.len(), 2);

        fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_stats_round_trip_and_version_gate() {
        let base = temp_base("stats");
        let store = FileMemoryStore::open(&base, None).await.unwrap();

        let mut stats = HashMap::new();
        stats.insert(
            "claude".to_string(),
            OracleStats {
                total: 10,
                wins: 7,
                losses: 3,
                avg_pnl: dec!(12.5),
                ema_win_rate: 0.68,
            },
        );
        store.put_stats(&stats).await.unwrap();
        assert_eq!(store.stats().await.unwrap(), stats);

        // A future-versioned record is ignored rather than misread
        atomic_write_json(
            &store.root().join("stats.json"),
            &StatsRecord {
                version: 99,
                outcome_count: 0,
                stats: stats.clone(),
            },
        )
        .unwrap();
        assert!(store.stats().await.unwrap().is_empty());

        // A snapshot behind the outcome log is treated as absent too
        store.put_stats(&stats).await.unwrap();
        store.put_outcome(&outcome("pos-new", 10)).await.unwrap();
        assert!(store.stats().await.unwrap().is_empty());

        fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_similar_ranks_by_cosine() {
        let base = temp_base("sim");
        let store = FileMemoryStore::open(&base, None).await.unwrap();

        let close = decision_record(vec![1.0, 0.0, 0.1]);
        let far = decision_record(vec![0.0, 1.0, 0.0]);
        store.put_decision(&close).await.unwrap();
        store.put_decision(&far).await.unwrap();

        let hits = store.similar(1, &[1.0, 0.0, 0.0]).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].decision.id, close.decision.id);

        fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let base = temp_base("reopen");
        {
            let store = FileMemoryStore::open(&base, None).await.unwrap();
            store
                .put_decision(&decision_record(vec![0.5, 0.5]))
                .await
                .unwrap();
        }

        let reopened = FileMemoryStore::open(&base, None).await.unwrap();
        let hits = reopened.similar(5, &[0.5, 0.5]).await.unwrap();
        assert_eq!(hits.len(), 1);

        fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_isolation_mode_separates_roots() {
        let base = temp_base("iso");
        let live = FileMemoryStore::open(&base, None).await.unwrap();
        let sim = FileMemoryStore::open(&base, Some("cfg123")).await.unwrap();

        sim.put_outcome(&outcome("sim-pos", 10)).await.unwrap();

        assert!(live.outcomes().await.unwrap().is_empty());
        assert_eq!(sim.outcomes().await.unwrap().len(), 1);
        assert_ne!(live.root(), sim.root());

        fs::remove_dir_all(&base).unwrap();
    }
}
