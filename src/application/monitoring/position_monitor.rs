//! Position monitor.
//!
//! Polls the venue for the position snapshot, detects opens and closes,
//! tracks live P&L, and emits one trade outcome per closed position.
//! Positions are identified by the stable key, and the known-id set is
//! checkpointed so a restart re-detects nothing. Up to K tracker workers
//! follow positions at high fidelity (peak/trough, stop/take confirmation);
//! the rest wait in a bounded queue at reduced fidelity until a slot frees.

use crate::domain::errors::PlatformError;
use crate::domain::ports::{DataProviderPort, PlatformPort, PortfolioBreakdown};
use crate::domain::types::{
    Decision, DecisionOrigin, EnsembleMeta, ExitReason, Position, PositionSide, PositionState,
    TradeAction, TradeOutcome,
};
use crate::infrastructure::core::CircuitBreakerError;
use crate::infrastructure::persistence::StateFile;
use crate::infrastructure::resources::{ResourceRegistry, ServiceKey};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// K: concurrent high-fidelity trackers.
    pub max_trackers: usize,
    pub tracker_poll_interval: Duration,
    /// Consecutive observations needed to confirm a stop/take cross.
    pub cross_confirmations: u32,
    pub outcome_channel_capacity: usize,
    pub startup_max_retries: u32,
    pub startup_backoff_base: Duration,
    /// Positions held past this are closed with a Timeout exit.
    pub max_hold: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_trackers: 2,
            tracker_poll_interval: Duration::from_secs(5),
            cross_confirmations: 2,
            outcome_channel_capacity: 64,
            startup_max_retries: 5,
            startup_backoff_base: Duration::from_secs(1),
            max_hold: None,
        }
    }
}

/// Events the agent drains into the memory engine during LEARNING.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Opened(Position),
    Closed(TradeOutcome),
}

/// Who to credit (or blame) for a position's outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionProvenance {
    pub decision_id: Uuid,
    pub oracle_ids: Vec<String>,
    pub regime_tag: String,
}

impl DecisionProvenance {
    fn recovery() -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            oracle_ids: Vec::new(),
            regime_tag: "recovered".to_string(),
        }
    }
}

/// Notices from the execution coordinator.
#[derive(Debug, Clone)]
pub enum ExecutionNotice {
    /// A dispatched order is expected to appear as this position.
    Expected {
        position_id: String,
        provenance: DecisionProvenance,
    },
    /// The coordinator closed this position on request.
    ExplicitClose { position_id: String },
}

/// Durable checkpoint: survives restarts so existing positions are not
/// re-detected as new and closed ones do not resurrect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MonitorCheckpoint {
    known_ids: HashSet<String>,
    closed_ids: HashSet<String>,
    provenance: HashMap<String, DecisionProvenance>,
}

/// Report from a tracker worker back to the poll loop.
#[derive(Debug, Clone)]
struct TrackerReport {
    position_id: String,
    reason: ExitReason,
}

/// What startup recovery hands back to the agent.
#[derive(Debug)]
pub struct RecoveredState {
    pub breakdown: PortfolioBreakdown,
    /// Open positions now under monitoring (tombstoned echoes excluded).
    pub open_positions: Vec<Position>,
    /// Synthetic decisions for positions with no provenance on file,
    /// marked `Recovery`.
    pub synthetic_decisions: Vec<(Position, Decision)>,
}

pub struct PositionMonitor {
    platform: Arc<dyn PlatformPort>,
    data: Arc<dyn DataProviderPort>,
    registry: Arc<ResourceRegistry>,
    credential_id: String,
    checkpoint_file: StateFile,
    config: MonitorConfig,
    event_tx: mpsc::Sender<MonitorEvent>,
    notice_rx: mpsc::Receiver<ExecutionNotice>,
    startup_complete_tx: watch::Sender<bool>,

    checkpoint: MonitorCheckpoint,
    /// Live positions, mutated by the poll loop and the trackers.
    live: Arc<RwLock<HashMap<String, Position>>>,
    /// Close reasons observed ahead of the snapshot confirming them.
    pending_exits: HashMap<String, ExitReason>,
}

pub struct MonitorHandles {
    pub events: mpsc::Receiver<MonitorEvent>,
    pub notices: mpsc::Sender<ExecutionNotice>,
    pub startup_complete: watch::Receiver<bool>,
}

impl PositionMonitor {
    pub fn new(
        platform: Arc<dyn PlatformPort>,
        data: Arc<dyn DataProviderPort>,
        registry: Arc<ResourceRegistry>,
        credential_id: impl Into<String>,
        checkpoint_file: StateFile,
        config: MonitorConfig,
    ) -> (Self, MonitorHandles) {
        let (event_tx, event_rx) = mpsc::channel(config.outcome_channel_capacity);
        let (notice_tx, notice_rx) = mpsc::channel(config.outcome_channel_capacity);
        let (startup_complete_tx, startup_complete_rx) = watch::channel(false);

        (
            Self {
                platform,
                data,
                registry,
                credential_id: credential_id.into(),
                checkpoint_file,
                config,
                event_tx,
                notice_rx,
                startup_complete_tx,
                checkpoint: MonitorCheckpoint::default(),
                live: Arc::new(RwLock::new(HashMap::new())),
                pending_exits: HashMap::new(),
            },
            MonitorHandles {
                events: event_rx,
                notices: notice_tx,
                startup_complete: startup_complete_rx,
            },
        )
    }

    fn venue_key(&self) -> ServiceKey {
        ServiceKey::new("venue", self.credential_id.clone())
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let resources = self.registry.resources_for(&self.venue_key()).await;
        resources.limiter.acquire().await;
        match resources.breaker.call(self.platform.positions()).await {
            Ok(positions) => Ok(positions),
            Err(CircuitBreakerError::Open(info)) => {
                Err(anyhow::anyhow!("venue circuit open: {}", info))
            }
            Err(CircuitBreakerError::Inner(e)) => Err(e).context("venue positions fetch failed"),
        }
    }

    /// Startup recovery: fetch the portfolio with exponential backoff,
    /// restore the checkpoint, and synthesize a `Recovery` decision for
    /// every open position the checkpoint has no provenance for. Marks
    /// `startup_complete` only after the known-id set is persisted.
    pub async fn recover(&mut self) -> Result<RecoveredState> {
        if let Some(saved) = self.checkpoint_file.load::<MonitorCheckpoint>().await? {
            info!(
                "PositionMonitor: restored checkpoint ({} known, {} closed)",
                saved.known_ids.len(),
                saved.closed_ids.len()
            );
            self.checkpoint = saved;
        }

        let mut attempt = 0u32;
        let breakdown = loop {
            match self.platform.portfolio_breakdown().await {
                Ok(b) => break b,
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.startup_max_retries {
                        return Err(e).context(format!(
                            "portfolio breakdown failed after {} attempts",
                            attempt
                        ));
                    }
                    let backoff = self.config.startup_backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        "PositionMonitor: portfolio fetch attempt {} failed ({:#}), retrying in {:?}",
                        attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        let mut synthetic = Vec::new();
        {
            let mut live = self.live.write().await;
            for position in &breakdown.positions {
                // A tombstoned id is a venue lag echo of a position whose
                // outcome was already emitted; never resurrect it
                if self.checkpoint.closed_ids.contains(&position.id) {
                    debug!(
                        "PositionMonitor: ignoring tombstoned position {}",
                        position.id
                    );
                    continue;
                }
                live.insert(position.id.clone(), position.clone());
                self.checkpoint.known_ids.insert(position.id.clone());

                if !self.checkpoint.provenance.contains_key(&position.id) {
                    let provenance = DecisionProvenance::recovery();
                    let decision = synthesize_recovery_decision(position, provenance.decision_id);
                    self.checkpoint
                        .provenance
                        .insert(position.id.clone(), provenance);
                    synthetic.push((position.clone(), decision));
                }
            }
        }

        self.persist_checkpoint().await?;
        let _ = self.startup_complete_tx.send(true);

        let open_positions: Vec<Position> = self.live.read().await.values().cloned().collect();
        info!(
            "PositionMonitor: startup complete ({} open, {} recovered without provenance)",
            open_positions.len(),
            synthetic.len()
        );

        Ok(RecoveredState {
            breakdown,
            open_positions,
            synthetic_decisions: synthetic,
        })
    }

    async fn persist_checkpoint(&self) -> Result<()> {
        self.checkpoint_file.save(&self.checkpoint).await
    }

    /// Run the poll loop until shutdown. Consumes the monitor.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let (tracker_tx, tracker_rx) =
            mpsc::channel::<Position>(self.config.max_trackers.max(1) * 2);
        // Unbounded so a blocked tracker queue can never starve report
        // draining into a deadlock; volume is bounded by position count
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<TrackerReport>();

        let tracker_rx = Arc::new(Mutex::new(tracker_rx));
        let mut workers = Vec::new();
        for worker_id in 0..self.config.max_trackers.max(1) {
            workers.push(tokio::spawn(tracker_worker(
                worker_id,
                Arc::clone(&tracker_rx),
                Arc::clone(&self.live),
                Arc::clone(&self.data),
                report_tx.clone(),
                self.config.tracker_poll_interval,
                self.config.cross_confirmations,
            )));
        }

        // Existing (recovered) positions get trackers first
        let initial: Vec<Position> = self.live.read().await.values().cloned().collect();
        for position in initial {
            if tracker_tx.send(position).await.is_err() {
                break;
            }
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "PositionMonitor: polling every {:?} with {} trackers",
            self.config.poll_interval, self.config.max_trackers
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("PositionMonitor: shutdown requested");
                        break;
                    }
                }
                Some(notice) = self.notice_rx.recv() => {
                    self.handle_notice(notice).await;
                }
                Some(report) = report_rx.recv() => {
                    self.handle_tracker_report(report).await;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_cycle(&tracker_tx).await {
                        error!("PositionMonitor: poll cycle failed: {:#}", e);
                    }
                }
            }
        }

        drop(tracker_tx);
        for worker in workers {
            worker.abort();
        }
    }

    async fn handle_notice(&mut self, notice: ExecutionNotice) {
        match notice {
            ExecutionNotice::Expected {
                position_id,
                provenance,
            } => {
                debug!(
                    "PositionMonitor: expecting position {} from decision {}",
                    position_id, provenance.decision_id
                );
                self.checkpoint
                    .provenance
                    .insert(position_id, provenance);
                if let Err(e) = self.persist_checkpoint().await {
                    warn!("PositionMonitor: checkpoint persist failed: {:#}", e);
                }
            }
            ExecutionNotice::ExplicitClose { position_id } => {
                // Explicit close wins over any detector
                self.note_exit(&position_id, ExitReason::Manual);
            }
        }
    }

    fn note_exit(&mut self, position_id: &str, reason: ExitReason) {
        let entry = self
            .pending_exits
            .entry(position_id.to_string())
            .or_insert(reason);
        if reason.precedence() < entry.precedence() {
            *entry = reason;
        }
    }

    async fn handle_tracker_report(&mut self, report: TrackerReport) {
        info!(
            "PositionMonitor [{}]: tracker confirmed {} cross",
            report.position_id, report.reason
        );
        self.note_exit(&report.position_id, report.reason);

        // Enforce the protective exit venue-side; the next snapshot diff
        // emits the outcome once the position is gone.
        let resources = self.registry.resources_for(&self.venue_key()).await;
        resources.limiter.acquire().await;
        match resources
            .breaker
            .call(self.platform.close(&report.position_id))
            .await
        {
            Ok(()) => {}
            Err(CircuitBreakerError::Inner(PlatformError::PositionNotFound { .. })) => {
                // Already gone venue-side; disappearance handling covers it
            }
            Err(e) => {
                warn!(
                    "PositionMonitor [{}]: protective close failed: {}",
                    report.position_id, e
                );
            }
        }
    }

    async fn poll_cycle(&mut self, tracker_tx: &mpsc::Sender<Position>) -> Result<()> {
        let snapshot = self.fetch_positions().await?;
        let snapshot_ids: HashSet<String> = snapshot.iter().map(|p| p.id.clone()).collect();
        let now = Utc::now();

        // Opens: in the snapshot, not yet known, not a tombstone
        for position in &snapshot {
            if self.checkpoint.closed_ids.contains(&position.id) {
                continue;
            }
            if self.checkpoint.known_ids.insert(position.id.clone()) {
                info!(
                    "PositionMonitor [{}]: detected new {} position {} (size {})",
                    position.instrument.symbol, position.side, position.id, position.size
                );
                self.live
                    .write()
                    .await
                    .insert(position.id.clone(), position.clone());
                self.persist_checkpoint().await?;

                if self
                    .event_tx
                    .send(MonitorEvent::Opened(position.clone()))
                    .await
                    .is_err()
                {
                    warn!("PositionMonitor: event channel closed");
                }
                // Blocking send: back-pressure instead of silent drops
                if tracker_tx.send(position.clone()).await.is_err() {
                    warn!("PositionMonitor: tracker queue closed");
                }
            }
        }

        // Hold-time enforcement
        if let Some(max_hold) = self.config.max_hold {
            let expired: Vec<String> = self
                .live
                .read()
                .await
                .values()
                .filter(|p| (now - p.opened_at).to_std().unwrap_or_default() > max_hold)
                .map(|p| p.id.clone())
                .collect();
            for id in expired {
                if !self.pending_exits.contains_key(&id) {
                    info!("PositionMonitor [{}]: max hold exceeded, closing", id);
                    self.note_exit(&id, ExitReason::Timeout);
                    let _ = self.platform.close(&id).await;
                }
            }
        }

        // Closes: known and live, but absent from the snapshot
        let closed: Vec<String> = {
            let live = self.live.read().await;
            live.keys()
                .filter(|id| !snapshot_ids.contains(*id))
                .cloned()
                .collect()
        };

        for position_id in closed {
            self.emit_close(&position_id, now).await?;
        }

        Ok(())
    }

    async fn emit_close(
        &mut self,
        position_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let Some(position) = self.live.write().await.remove(position_id) else {
            return Ok(());
        };

        let reason = self
            .pending_exits
            .remove(position_id)
            .unwrap_or(ExitReason::Disappeared);

        // Best-effort exit valuation from the latest quote
        let pnl = match self.data.quote(&position.instrument).await {
            Ok(quote) => position.unrealised_pnl(quote.mid()),
            Err(e) => {
                warn!(
                    "PositionMonitor [{}]: no exit quote ({:#}), recording flat P&L",
                    position_id, e
                );
                Decimal::ZERO
            }
        };
        let notional = (position.entry_price * position.size).abs();
        let pnl_pct = if notional.is_zero() {
            0.0
        } else {
            (pnl / notional).to_f64().unwrap_or(0.0)
        };

        let provenance = self
            .checkpoint
            .provenance
            .get(position_id)
            .cloned()
            .unwrap_or_else(DecisionProvenance::recovery);

        let outcome = TradeOutcome {
            position_id: position_id.to_string(),
            decision_id: provenance.decision_id,
            pnl,
            pnl_pct,
            duration_secs: (now - position.opened_at).num_seconds(),
            exit_reason: reason,
            oracle_ids: provenance.oracle_ids,
            regime_tag: provenance.regime_tag,
            closed_at: now,
        };

        self.checkpoint.known_ids.remove(position_id);
        self.checkpoint.closed_ids.insert(position_id.to_string());
        self.checkpoint.provenance.remove(position_id);
        self.persist_checkpoint().await?;

        info!(
            "PositionMonitor [{}]: closed via {} (pnl {})",
            position_id, reason, pnl
        );

        // At-least-once: block on the bounded channel, drop nothing
        if self
            .event_tx
            .send(MonitorEvent::Closed(outcome))
            .await
            .is_err()
        {
            warn!("PositionMonitor: event channel closed, outcome not delivered");
        }
        Ok(())
    }

    /// Ids currently checkpointed as open; test and status surface.
    pub fn known_ids(&self) -> HashSet<String> {
        self.checkpoint.known_ids.clone()
    }
}

fn synthesize_recovery_decision(position: &Position, decision_id: Uuid) -> Decision {
    Decision {
        id: decision_id,
        instrument: position.instrument.clone(),
        action: match position.side {
            PositionSide::Long => TradeAction::Buy,
            PositionSide::Short => TradeAction::Sell,
        },
        confidence: 0,
        recommended_size: Some(position.size),
        entry: position.entry_price,
        stop_loss: position.stop_loss,
        take_profit: position.take_profit,
        ensemble: EnsembleMeta::recovery(),
        signal_only: true,
        origin: DecisionOrigin::Recovery,
        created_at: position.opened_at,
    }
}

/// High-fidelity tracker worker: pulls positions off the queue and follows
/// one at a time, updating peak/trough and confirming stop/take crosses.
/// A position still queued is tracked at reduced fidelity (snapshot polls
/// only) until a worker frees up.
async fn tracker_worker(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Position>>>,
    live: Arc<RwLock<HashMap<String, Position>>>,
    data: Arc<dyn DataProviderPort>,
    reports: mpsc::UnboundedSender<TrackerReport>,
    poll_interval: Duration,
    confirmations: u32,
) {
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(position) = next else {
            debug!("Tracker[{}]: queue closed, exiting", worker_id);
            return;
        };

        debug!(
            "Tracker[{}]: following {} ({})",
            worker_id, position.id, position.instrument.symbol
        );

        let mut tp_streak = 0u32;
        let mut sl_streak = 0u32;

        loop {
            tokio::time::sleep(poll_interval).await;

            // Stop when the poll loop has removed the position
            let Some(current) = live.read().await.get(&position.id).cloned() else {
                break;
            };

            let quote = match data.quote(&current.instrument).await {
                Ok(q) => q,
                Err(e) => {
                    debug!("Tracker[{}]: quote failed: {:#}", worker_id, e);
                    continue;
                }
            };
            let mid = quote.mid();
            let pnl = current.unrealised_pnl(mid);

            {
                let mut live = live.write().await;
                if let Some(p) = live.get_mut(&position.id) {
                    if pnl > p.peak_unrealised {
                        p.peak_unrealised = pnl;
                    }
                    if pnl < p.trough_unrealised {
                        p.trough_unrealised = pnl;
                    }
                }
            }

            let tp_hit = match (current.take_profit, current.side) {
                (Some(tp), PositionSide::Long) => mid >= tp,
                (Some(tp), PositionSide::Short) => mid <= tp,
                (None, _) => false,
            };
            let sl_hit = match (current.stop_loss, current.side) {
                (Some(sl), PositionSide::Long) => mid <= sl,
                (Some(sl), PositionSide::Short) => mid >= sl,
                (None, _) => false,
            };

            tp_streak = if tp_hit { tp_streak + 1 } else { 0 };
            sl_streak = if sl_hit { sl_streak + 1 } else { 0 };

            // Take-profit outranks stop-loss when both confirm on the
            // same observation window
            let reason = if tp_streak >= confirmations {
                Some(ExitReason::TakeProfit)
            } else if sl_streak >= confirmations {
                Some(ExitReason::StopLoss)
            } else {
                None
            };

            if let Some(reason) = reason {
                if reports
                    .send(TrackerReport {
                        position_id: position.id.clone(),
                        reason,
                    })
                    .is_err()
                {
                    return;
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AssetClass, Instrument};
    use crate::infrastructure::mock::{MockDataProvider, MockPlatform};
    use crate::infrastructure::resources::ResourceConfig;
    use rust_decimal_macros::dec;

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(20),
            max_trackers: 2,
            tracker_poll_interval: Duration::from_millis(10),
            cross_confirmations: 2,
            outcome_channel_capacity: 16,
            startup_max_retries: 3,
            startup_backoff_base: Duration::from_millis(5),
            max_hold: None,
        }
    }

    fn registry() -> Arc<ResourceRegistry> {
        Arc::new(ResourceRegistry::new(ResourceConfig {
            free_tier: crate::infrastructure::resources::RateTier {
                rate_per_sec: 10_000.0,
                capacity: 10_000.0,
            },
            ..ResourceConfig::default()
        }))
    }

    fn checkpoint_path() -> StateFile {
        StateFile::new(
            std::env::temp_dir()
                .join(format!("qt-monitor-{}", Uuid::new_v4()))
                .join("checkpoint.json"),
        )
    }

    fn open_position(symbol: &str, entry: Decimal) -> Position {
        let instrument = Instrument::new(symbol, AssetClass::Crypto, "binance");
        let id = crate::domain::types::position_key(
            &instrument.venue,
            symbol,
            PositionSide::Long,
            entry,
        );
        Position {
            id,
            instrument,
            side: PositionSide::Long,
            entry_price: entry,
            size: dec!(1),
            opened_at: Utc::now(),
            stop_loss: Some(entry - dec!(1000)),
            take_profit: Some(entry + dec!(1000)),
            peak_unrealised: Decimal::ZERO,
            trough_unrealised: Decimal::ZERO,
            state: PositionState::Open,
        }
    }

    fn build_monitor(
        platform: &MockPlatform,
        data: &MockDataProvider,
        checkpoint: StateFile,
    ) -> (PositionMonitor, MonitorHandles) {
        PositionMonitor::new(
            Arc::new(platform.clone()),
            Arc::new(data.clone()),
            registry(),
            "test-cred",
            checkpoint,
            fast_config(),
        )
    }

    #[tokio::test]
    async fn test_recovery_synthesizes_decisions_for_unknown_positions() {
        let platform = MockPlatform::new(dec!(100000));
        let data = MockDataProvider::new();
        let existing = open_position("BTC/USD", dec!(50000));
        platform.insert_position(existing.clone()).await;

        let (mut monitor, handles) = build_monitor(&platform, &data, checkpoint_path());
        assert!(!*handles.startup_complete.borrow());

        let recovered = monitor.recover().await.unwrap();

        assert!(*handles.startup_complete.borrow());
        assert_eq!(recovered.synthetic_decisions.len(), 1);
        let (position, decision) = &recovered.synthetic_decisions[0];
        assert_eq!(position.id, existing.id);
        assert_eq!(decision.origin, DecisionOrigin::Recovery);
        assert!(decision.signal_only);
        assert_eq!(monitor.known_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_does_not_resynthesize() {
        let platform = MockPlatform::new(dec!(100000));
        let data = MockDataProvider::new();
        platform
            .insert_position(open_position("BTC/USD", dec!(50000)))
            .await;

        let checkpoint = checkpoint_path();

        let (mut first, _h1) = build_monitor(&platform, &data, checkpoint.clone());
        let recovered = first.recover().await.unwrap();
        assert_eq!(recovered.synthetic_decisions.len(), 1);
        let ids_before = first.known_ids();

        // Same world, fresh monitor: nothing new, same tracked set
        let (mut second, _h2) = build_monitor(&platform, &data, checkpoint);
        let recovered = second.recover().await.unwrap();
        assert!(recovered.synthetic_decisions.is_empty());
        assert_eq!(second.known_ids(), ids_before);
    }

    #[tokio::test]
    async fn test_poll_detects_open_and_close_with_provenance() {
        let platform = MockPlatform::new(dec!(100000));
        let data = MockDataProvider::new();
        let (mut monitor, mut handles) = build_monitor(&platform, &data, checkpoint_path());
        monitor.recover().await.unwrap();

        let shutdown = watch::channel(false);
        let notices = handles.notices.clone();
        let monitor_task = tokio::spawn(monitor.run(shutdown.1.clone()));

        // Coordinator announces the expected position, then it appears
        let position = open_position("ETH/USD", dec!(3000));
        let instrument = position.instrument.clone();
        data.set_price(&instrument, dec!(3000)).await;
        let provenance = DecisionProvenance {
            decision_id: Uuid::new_v4(),
            oracle_ids: vec!["claude".to_string()],
            regime_tag: "favorable".to_string(),
        };
        notices
            .send(ExecutionNotice::Expected {
                position_id: position.id.clone(),
                provenance: provenance.clone(),
            })
            .await
            .unwrap();
        platform.insert_position(position.clone()).await;

        // Open event arrives
        let opened = tokio::time::timeout(Duration::from_secs(2), handles.events.recv())
            .await
            .unwrap()
            .unwrap();
        match opened {
            MonitorEvent::Opened(p) => assert_eq!(p.id, position.id),
            other => panic!("expected open event, got {:?}", other),
        }

        // Position vanishes at a profit
        data.set_price(&instrument, dec!(3100)).await;
        platform.remove_position(&position.id).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), handles.events.recv())
            .await
            .unwrap()
            .unwrap();
        match closed {
            MonitorEvent::Closed(outcome) => {
                assert_eq!(outcome.position_id, position.id);
                assert_eq!(outcome.decision_id, provenance.decision_id);
                assert_eq!(outcome.oracle_ids, vec!["claude".to_string()]);
                assert_eq!(outcome.exit_reason, ExitReason::Disappeared);
                assert_eq!(outcome.pnl, dec!(100));
            }
            other => panic!("expected close event, got {:?}", other),
        }

        let _ = shutdown.0.send(true);
        let _ = monitor_task.await;
    }

    #[tokio::test]
    async fn test_explicit_close_outranks_disappearance() {
        let platform = MockPlatform::new(dec!(100000));
        let data = MockDataProvider::new();
        let position = open_position("BTC/USD", dec!(50000));
        data.set_price(&position.instrument, dec!(50000)).await;
        platform.insert_position(position.clone()).await;

        let (mut monitor, mut handles) = build_monitor(&platform, &data, checkpoint_path());
        monitor.recover().await.unwrap();

        let shutdown = watch::channel(false);
        let notices = handles.notices.clone();
        let monitor_task = tokio::spawn(monitor.run(shutdown.1.clone()));

        notices
            .send(ExecutionNotice::ExplicitClose {
                position_id: position.id.clone(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        platform.remove_position(&position.id).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), handles.events.recv())
            .await
            .unwrap()
            .unwrap();
        match closed {
            MonitorEvent::Closed(outcome) => {
                assert_eq!(outcome.exit_reason, ExitReason::Manual);
            }
            other => panic!("expected close event, got {:?}", other),
        }

        let _ = shutdown.0.send(true);
        let _ = monitor_task.await;
    }

    #[tokio::test]
    async fn test_tracker_confirms_take_profit_cross() {
        let platform = MockPlatform::new(dec!(100000));
        let data = MockDataProvider::new();
        let position = open_position("BTC/USD", dec!(50000));
        data.set_price(&position.instrument, dec!(50000)).await;
        platform.insert_position(position.clone()).await;

        let (mut monitor, mut handles) = build_monitor(&platform, &data, checkpoint_path());
        monitor.recover().await.unwrap();

        let shutdown = watch::channel(false);
        let monitor_task = tokio::spawn(monitor.run(shutdown.1.clone()));

        // Price over the 51_000 take-profit for several tracker polls
        data.set_price(&position.instrument, dec!(51500)).await;

        let closed = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                match handles.events.recv().await {
                    Some(MonitorEvent::Closed(outcome)) => break outcome,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(closed.exit_reason, ExitReason::TakeProfit);
        assert!(closed.pnl > Decimal::ZERO);

        let _ = shutdown.0.send(true);
        let _ = monitor_task.await;
    }
}
