//! The trading agent: an OODA loop over the configured instrument set.
//!
//! STARTUP reconstructs state through the position monitor, then the loop
//! runs IDLE -> LEARNING -> PERCEPTION -> REASONING -> RISK_CHECK ->
//! EXECUTION. The state machine is serial; parallelism lives inside
//! REASONING's bounded fan-out. Kill switch, pause, stop, and external
//! cancellation are honored at every suspension point.

use crate::application::agent::control::{AgentCommand, AgentEvent, AgentWiring};
use crate::application::agent::state::{AgentExit, AgentState, AgentStatus};
use crate::application::ensemble::aggregator::{AggregationError, EnsembleAggregator};
use crate::application::execution::coordinator::{
    DispatchContext, ExecutionCoordinator, ExecutionStatus,
};
use crate::application::execution::ledger::TradeLedger;
use crate::application::freshness::{FreshnessGate, FreshnessVerdict};
use crate::application::memory::engine::{MemoryContext, MemoryEngine};
use crate::application::monitoring::position_monitor::{MonitorEvent, PositionMonitor};
use crate::application::providers::pool::DecisionProviderPool;
use crate::application::risk_management::filters::kill_switch_engaged;
use crate::application::risk_management::{
    RiskContext, RiskGatekeeper, RiskVerdict, SizingEngine,
};
use crate::domain::errors::ProviderError;
use crate::domain::ports::{DataProviderPort, PlatformPort};
use crate::domain::types::{
    AgentFault, Decision, DecisionOrigin, DecisionOutcome, FallbackTier, Granularity, Instrument,
    NoDecisionReason, Position, Quote, RiskLimits, TradeAction,
};
use crate::infrastructure::core::{CircuitBreakerError, CircuitState};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::resources::{ResourceRegistry, ServiceKey};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub instruments: Vec<Instrument>,
    /// IDLE tick period.
    pub analysis_frequency: Duration,
    /// L: max outcomes drained per LEARNING entry.
    pub learning_batch: usize,
    /// Worker bound for per-asset analyses inside REASONING.
    pub reasoning_concurrency: usize,
    pub granularity: Granularity,
    /// Candles fetched for the returns series.
    pub candle_history: usize,
    pub fault_decay_secs: i64,
    pub fault_backoff_base_secs: i64,
    pub recovery_max_attempts: u32,
    pub recovery_backoff_base: Duration,
    pub allow_closed_sessions: bool,
    /// Status keepalive period for stream subscribers.
    pub keepalive: Duration,
    /// Bound on the shutdown outcome drain.
    pub shutdown_drain: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            analysis_frequency: Duration::from_secs(300),
            learning_batch: 32,
            reasoning_concurrency: 3,
            granularity: Granularity::Intraday,
            candle_history: 64,
            fault_decay_secs: 900,
            fault_backoff_base_secs: 60,
            recovery_max_attempts: 5,
            recovery_backoff_base: Duration::from_secs(2),
            allow_closed_sessions: false,
            keepalive: Duration::from_secs(25),
            shutdown_drain: Duration::from_secs(5),
        }
    }
}

/// Per-instrument result of one REASONING pass.
struct Analysis {
    outcome: DecisionOutcome,
    quote: Option<Quote>,
    freshness: Option<FreshnessVerdict>,
    returns: Vec<f64>,
    regime_tag: String,
}

/// What PERCEPTION observed this cycle.
struct Perception {
    equity: Decimal,
    day_pnl: Decimal,
    drawdown: f64,
    positions: HashMap<String, Position>,
}

/// Market view assembled once per cycle from the REASONING quotes: live
/// prices for exposure valuation and the pairwise correlation matrix.
/// RISK_CHECK and the coordinator's dispatch-time re-check both judge
/// against this same view.
struct CycleView {
    prices: HashMap<String, Decimal>,
    correlations: Option<HashMap<(String, String), f64>>,
}

fn cycle_view(analyses: &[Analysis]) -> CycleView {
    let mut prices: HashMap<String, Decimal> = HashMap::new();
    let mut return_series: Vec<(&str, &[f64])> = Vec::new();
    for analysis in analyses {
        if let Some(quote) = &analysis.quote {
            prices.insert(quote.symbol.clone(), quote.mid());
            if !analysis.returns.is_empty() {
                return_series.push((quote.symbol.as_str(), &analysis.returns));
            }
        }
    }
    CycleView {
        prices,
        correlations: correlation_matrix(&return_series),
    }
}

pub struct TradingAgent {
    config: AgentConfig,
    limits: RiskLimits,
    strict_quorum: bool,

    data: Arc<dyn DataProviderPort>,
    platform: Arc<dyn PlatformPort>,
    registry: Arc<ResourceRegistry>,
    credential_id: String,
    freshness: FreshnessGate,
    pool: Arc<DecisionProviderPool>,
    aggregator: Arc<EnsembleAggregator>,
    gatekeeper: Arc<RiskGatekeeper>,
    sizer: Arc<SizingEngine>,
    coordinator: Arc<ExecutionCoordinator>,
    memory: Arc<MemoryEngine>,
    ledger: Arc<TradeLedger>,
    metrics: Metrics,

    monitor_events: mpsc::Receiver<MonitorEvent>,
    wiring: AgentWiring,

    cycle: u64,
    faults: HashMap<String, AgentFault>,
    day_start_equity: Decimal,
    high_water_mark: Decimal,
    paused: bool,
    kill_switch: bool,
    last_cycle_at: Option<DateTime<Utc>>,
}

impl TradingAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        limits: RiskLimits,
        strict_quorum: bool,
        data: Arc<dyn DataProviderPort>,
        platform: Arc<dyn PlatformPort>,
        registry: Arc<ResourceRegistry>,
        credential_id: impl Into<String>,
        freshness: FreshnessGate,
        pool: Arc<DecisionProviderPool>,
        aggregator: Arc<EnsembleAggregator>,
        gatekeeper: Arc<RiskGatekeeper>,
        sizer: Arc<SizingEngine>,
        coordinator: Arc<ExecutionCoordinator>,
        memory: Arc<MemoryEngine>,
        ledger: Arc<TradeLedger>,
        metrics: Metrics,
        monitor_events: mpsc::Receiver<MonitorEvent>,
        wiring: AgentWiring,
    ) -> Self {
        Self {
            config,
            limits,
            strict_quorum,
            data,
            platform,
            registry,
            credential_id: credential_id.into(),
            freshness,
            pool,
            aggregator,
            gatekeeper,
            sizer,
            coordinator,
            memory,
            ledger,
            metrics,
            monitor_events,
            wiring,
            cycle: 0,
            faults: HashMap::new(),
            day_start_equity: Decimal::ZERO,
            high_water_mark: Decimal::ZERO,
            paused: false,
            kill_switch: false,
            last_cycle_at: None,
        }
    }

    fn transition(&mut self, state: AgentState, trace_id: Uuid) {
        info!(
            "TradingAgent: [cycle {}] [{}] -> {}",
            self.cycle, trace_id, state
        );
        let status = AgentStatus {
            state,
            sub_state: None,
            cycle: self.cycle,
            last_cycle_at: self.last_cycle_at,
            open_positions_count: self.memory.open_position_count(),
            kill_switch: self.kill_switch,
            faulted_assets: self.faults.keys().cloned().collect(),
            paused: self.paused,
        };
        self.wiring.status_tx.send_replace(status);
        let _ = self.wiring.events_tx.send(AgentEvent::StateChanged {
            state,
            cycle: self.cycle,
            trace_id,
        });
    }

    /// Run to a terminal condition. The agent owns startup recovery and
    /// spawns the monitor loop once `startup_complete` is reached.
    pub async fn run(
        mut self,
        mut monitor: PositionMonitor,
        shutdown_tx: watch::Sender<bool>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> AgentExit {
        let trace_id = Uuid::new_v4();
        self.transition(AgentState::Startup, trace_id);
        self.transition(AgentState::PositionRecovery, trace_id);

        let recovered = match monitor.recover().await {
            Ok(r) => r,
            Err(e) => {
                error!("TradingAgent: startup recovery failed: {:#}", e);
                self.transition(AgentState::Halt, trace_id);
                return AgentExit::Fatal(e);
            }
        };

        self.day_start_equity = recovered.breakdown.balance.equity;
        self.high_water_mark = recovered.breakdown.balance.equity;

        for (_, decision) in &recovered.synthetic_decisions {
            if let Err(e) = self.memory.record_decision(decision).await {
                warn!("TradingAgent: recovery decision persist failed: {:#}", e);
            }
        }
        for position in &recovered.open_positions {
            self.memory.register_open(position).await;
        }
        info!(
            "TradingAgent: recovery complete, {} open positions, equity {}",
            recovered.open_positions.len(),
            recovered.breakdown.balance.equity
        );

        let monitor_task = tokio::spawn(monitor.run(shutdown_rx.clone()));
        let mut recovery_attempts = 0u32;

        let exit = 'agent: loop {
            // IDLE: tick, keepalive, commands, cancellation
            let cycle_trace = Uuid::new_v4();
            self.transition(AgentState::Idle, cycle_trace);
            match self.idle(&mut shutdown_rx).await {
                IdleOutcome::Tick => {}
                IdleOutcome::Stop => break 'agent AgentExit::Stopped,
                IdleOutcome::Cancelled => break 'agent AgentExit::Cancelled,
            }
            if self.paused {
                continue;
            }

            // LEARNING: bounded outcome drain
            self.transition(AgentState::Learning, cycle_trace);
            self.drain_learning(self.config.learning_batch).await;

            // PERCEPTION
            self.transition(AgentState::Perception, cycle_trace);
            let perception = match self.perceive().await {
                Ok(p) => {
                    recovery_attempts = 0;
                    p
                }
                Err(e) => {
                    recovery_attempts += 1;
                    if recovery_attempts >= self.config.recovery_max_attempts {
                        error!(
                            "TradingAgent: perception failed {} times, halting: {:#}",
                            recovery_attempts, e
                        );
                        break 'agent AgentExit::Fatal(
                            crate::domain::errors::FatalError::RecoveryFailed {
                                attempts: recovery_attempts,
                                source: e,
                            }
                            .into(),
                        );
                    }
                    self.transition(AgentState::Recovering, cycle_trace);
                    let backoff =
                        self.config.recovery_backoff_base * 2u32.pow(recovery_attempts - 1);
                    warn!(
                        "TradingAgent: perception failed ({:#}), recovering in {:?} (attempt {})",
                        e, backoff, recovery_attempts
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => continue,
                        _ = shutdown_rx.changed() => break 'agent AgentExit::Cancelled,
                    }
                }
            };

            if self.kill_switch {
                let _ = self.wiring.events_tx.send(AgentEvent::KillSwitchTripped {
                    day_pnl: perception.day_pnl.to_string(),
                });
                self.transition(AgentState::Halt, cycle_trace);
                break 'agent AgentExit::KillSwitch;
            }

            // REASONING: bounded parallel per-asset pipeline
            self.transition(AgentState::Reasoning, cycle_trace);
            let analyses = self.reason(&perception).await;

            // RISK_CHECK then EXECUTION, decision by decision, both
            // against the same per-cycle market view
            self.transition(AgentState::RiskCheck, cycle_trace);
            let view = cycle_view(&analyses);
            let approved = self.risk_check(&perception, &view, &analyses).await;

            self.transition(AgentState::Execution, cycle_trace);
            self.execute_approved(&perception, &view, approved).await;

            self.cycle += 1;
            self.last_cycle_at = Some(Utc::now());
            self.metrics
                .cycles_total
                .with_label_values(&["completed"])
                .inc();
        };

        // Cancel subsystems and drain outstanding outcomes, bounded
        let _ = shutdown_tx.send(true);
        if !matches!(exit, AgentExit::Fatal(_)) {
            let drain = tokio::time::timeout(self.config.shutdown_drain, async {
                while let Some(event) = self.monitor_events.recv().await {
                    self.apply_monitor_event(event).await;
                }
            });
            if drain.await.is_err() {
                debug!("TradingAgent: shutdown drain window elapsed");
            }
        }
        let _ = monitor_task.await;

        let trace_id = Uuid::new_v4();
        self.transition(AgentState::Halt, trace_id);
        info!("TradingAgent: halted after {} cycles", self.cycle);
        exit
    }

    async fn idle(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> IdleOutcome {
        let deadline = tokio::time::Instant::now() + self.config.analysis_frequency;
        loop {
            let keepalive = tokio::time::sleep(self.config.keepalive);
            tokio::pin!(keepalive);

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return IdleOutcome::Tick,
                _ = &mut keepalive => {
                    // Status stream stays warm for subscribers
                    let _ = self.wiring.events_tx.send(AgentEvent::Keepalive);
                    self.wiring.status_tx.send_replace(self.current_status());
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return IdleOutcome::Cancelled;
                    }
                }
                Some(command) = self.wiring.cmd_rx.recv() => {
                    match command {
                        AgentCommand::Pause => {
                            info!("TradingAgent: paused");
                            self.paused = true;
                            self.wiring.status_tx.send_replace(self.current_status());
                        }
                        AgentCommand::Resume => {
                            info!("TradingAgent: resumed");
                            self.paused = false;
                            self.wiring.status_tx.send_replace(self.current_status());
                            return IdleOutcome::Tick;
                        }
                        AgentCommand::Stop => return IdleOutcome::Stop,
                        AgentCommand::EmergencyStop => {
                            warn!("TradingAgent: EMERGENCY STOP");
                            return IdleOutcome::Stop;
                        }
                    }
                }
            }
        }
    }

    fn current_status(&self) -> AgentStatus {
        AgentStatus {
            state: AgentState::Idle,
            sub_state: None,
            cycle: self.cycle,
            last_cycle_at: self.last_cycle_at,
            open_positions_count: self.memory.open_position_count(),
            kill_switch: self.kill_switch,
            faulted_assets: self.faults.keys().cloned().collect(),
            paused: self.paused,
        }
    }

    async fn apply_monitor_event(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::Opened(position) => {
                self.memory.register_open(&position).await;
            }
            MonitorEvent::Closed(outcome) => {
                self.metrics
                    .outcomes_total
                    .with_label_values(&[&outcome.exit_reason.to_string()])
                    .inc();
                match self.memory.record_outcome(&outcome).await {
                    Ok(true) => {
                        let _ = self
                            .wiring
                            .events_tx
                            .send(AgentEvent::OutcomeRecorded(outcome));
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("TradingAgent: outcome record failed: {:#}", e);
                    }
                }
            }
        }
    }

    /// Drain at most `batch` monitor events so LEARNING cannot starve
    /// REASONING.
    async fn drain_learning(&mut self, batch: usize) -> usize {
        let mut drained = 0usize;
        while drained < batch {
            match self.monitor_events.try_recv() {
                Ok(event) => {
                    self.apply_monitor_event(event).await;
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        if drained > 0 {
            debug!("TradingAgent: drained {} monitor events", drained);
        }
        drained
    }

    async fn perceive(&mut self) -> Result<Perception> {
        let resources = self
            .registry
            .resources_for(&ServiceKey::new("venue", self.credential_id.clone()))
            .await;
        resources.limiter.acquire().await;

        let balance = match resources.breaker.call(self.platform.balance()).await {
            Ok(b) => b,
            Err(CircuitBreakerError::Open(info)) => {
                return Err(anyhow::anyhow!("venue circuit open: {}", info));
            }
            Err(CircuitBreakerError::Inner(e)) => {
                return Err(e).context("balance fetch failed");
            }
        };

        resources.limiter.acquire().await;
        let positions = match resources.breaker.call(self.platform.positions()).await {
            Ok(p) => p,
            Err(CircuitBreakerError::Open(info)) => {
                return Err(anyhow::anyhow!("venue circuit open: {}", info));
            }
            Err(CircuitBreakerError::Inner(e)) => {
                return Err(e).context("positions fetch failed");
            }
        };

        let now = Utc::now();
        if self.ledger.reset_if_new_day(now).await {
            self.day_start_equity = balance.equity;
        }
        if balance.equity > self.high_water_mark {
            self.high_water_mark = balance.equity;
        }

        let day_pnl = balance.equity - self.day_start_equity;
        let drawdown = if self.high_water_mark > Decimal::ZERO {
            ((self.high_water_mark - balance.equity) / self.high_water_mark)
                .to_f64()
                .unwrap_or(0.0)
                .max(0.0)
        } else {
            0.0
        };

        self.metrics
            .daily_pnl
            .set(day_pnl.to_f64().unwrap_or(0.0));
        self.metrics
            .open_positions
            .set(positions.len() as f64);
        for (service, state) in self.registry.breaker_states().await {
            let value = match state {
                CircuitState::Closed => 0.0,
                CircuitState::HalfOpen => 1.0,
                CircuitState::Open => 2.0,
            };
            self.metrics
                .circuit_state
                .with_label_values(&[&service])
                .set(value);
        }

        if kill_switch_engaged(day_pnl, balance.equity, self.limits.kill_switch_pct) {
            error!(
                "TradingAgent: KILL SWITCH tripped (day P&L {} on equity {})",
                day_pnl, balance.equity
            );
            self.kill_switch = true;
            self.metrics.kill_switch.set(1.0);
        }

        Ok(Perception {
            equity: balance.equity,
            day_pnl,
            drawdown,
            positions: positions.into_iter().map(|p| (p.id.clone(), p)).collect(),
        })
    }

    /// Is this instrument's fault window still backing off?
    fn faulted(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.faults
            .get(symbol)
            .map(|f| now < f.backoff_until(self.config.fault_backoff_base_secs))
            .unwrap_or(false)
    }

    async fn reason(&mut self, perception: &Perception) -> Vec<Analysis> {
        let now = Utc::now();

        let mut eligible = Vec::new();
        for instrument in &self.config.instruments {
            if self.faulted(&instrument.symbol, now) {
                debug!(
                    "TradingAgent [{}]: skipped, fault backoff active",
                    instrument.symbol
                );
                continue;
            }
            if self.ledger.in_cooldown(&instrument.symbol, now).await {
                debug!(
                    "TradingAgent [{}]: skipped, execution cooldown",
                    instrument.symbol
                );
                continue;
            }
            eligible.push(instrument.clone());
        }

        let equity = perception.equity;
        let agent = &*self;
        let results: Vec<(Instrument, Result<Analysis>)> = stream::iter(
            eligible.into_iter().map(|instrument| async move {
                let analysis = agent.analyze_instrument(&instrument, equity, now).await;
                (instrument, analysis)
            }),
        )
        .buffer_unordered(self.config.reasoning_concurrency.max(1))
        .collect()
        .await;

        let mut analyses = Vec::new();
        for (instrument, result) in results {
            match result {
                Ok(analysis) => {
                    self.publish_analysis(&analysis).await;
                    analyses.push(analysis);
                }
                Err(e) => {
                    let fault = AgentFault::record(
                        self.faults.get(&instrument.symbol).copied(),
                        now,
                        self.config.fault_decay_secs,
                    );
                    warn!(
                        "TradingAgent [{}]: analysis failed (fault #{}): {:#}",
                        instrument.symbol, fault.failure_count, e
                    );
                    self.faults.insert(instrument.symbol.clone(), fault);
                }
            }
        }
        analyses
    }

    async fn publish_analysis(&self, analysis: &Analysis) {
        match &analysis.outcome {
            DecisionOutcome::Actionable(decision) => {
                self.metrics
                    .decisions_total
                    .with_label_values(&[
                        &decision.action.to_string(),
                        &decision.ensemble.fallback_tier.to_string(),
                    ])
                    .inc();
                if let Err(e) = self.memory.record_decision(decision).await {
                    warn!("TradingAgent: decision persist failed: {:#}", e);
                }
            }
            DecisionOutcome::NoDecision { symbol, reason } => {
                info!("TradingAgent [{}]: NO_DECISION ({})", symbol, reason);
                self.metrics
                    .no_decisions_total
                    .with_label_values(&[no_decision_label(reason)])
                    .inc();
            }
        }
        let _ = self
            .wiring
            .events_tx
            .send(AgentEvent::DecisionProduced(analysis.outcome.clone()));
    }

    async fn analyze_instrument(
        &self,
        instrument: &Instrument,
        equity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Analysis> {
        let resources = self
            .registry
            .resources_for(&ServiceKey::new("data", self.credential_id.clone()))
            .await;
        resources.limiter.acquire().await;

        let quote = match resources.breaker.call(self.data.quote(instrument)).await {
            Ok(q) => q,
            Err(CircuitBreakerError::Open(info)) => {
                // Outage surfaces as "cannot answer", never as HOLD
                return Ok(Analysis {
                    outcome: DecisionOutcome::NoDecision {
                        symbol: instrument.symbol.clone(),
                        reason: NoDecisionReason::CircuitOpen {
                            service: info.service,
                        },
                    },
                    quote: None,
                    freshness: None,
                    returns: Vec::new(),
                    regime_tag: "unknown".to_string(),
                });
            }
            Err(CircuitBreakerError::Inner(e)) => {
                return Err(e).context("quote fetch failed");
            }
        };

        // Gate before any oracle is consulted
        let verdict = self
            .freshness
            .check(&quote, instrument.asset_class, self.config.granularity, now);
        if !verdict.fresh {
            return Ok(Analysis {
                outcome: DecisionOutcome::NoDecision {
                    symbol: instrument.symbol.clone(),
                    reason: NoDecisionReason::StaleData {
                        age_secs: verdict.age.num_seconds(),
                        limit_secs: verdict.limit.num_seconds(),
                    },
                },
                quote: Some(quote),
                freshness: Some(verdict),
                returns: Vec::new(),
                regime_tag: "unknown".to_string(),
            });
        }

        let memory_ctx = self.memory.context(instrument).await;
        let returns = self.fetch_returns(instrument).await;

        let prompt = build_prompt(instrument, &quote, &memory_ctx);
        let fan_out = self.pool.fan_out(&prompt).await;
        for (oracle, failure) in &fan_out.failed {
            self.metrics
                .provider_failures_total
                .with_label_values(&[oracle, provider_failure_label(failure)])
                .inc();
        }

        let signal = match self.aggregator.aggregate(
            &fan_out.ok,
            &fan_out.failed,
            Some(&memory_ctx.oracle_weights),
        ) {
            Ok(signal) => signal,
            Err(AggregationError::NoProviders) => {
                let all_circuit_open = !fan_out.failed.is_empty()
                    && fan_out
                        .failed
                        .values()
                        .all(|f| matches!(f, ProviderError::CircuitOpen { .. }));
                let reason = if all_circuit_open {
                    NoDecisionReason::CircuitOpen {
                        service: "oracles".to_string(),
                    }
                } else {
                    NoDecisionReason::AllProvidersFailed
                };
                return Ok(Analysis {
                    outcome: DecisionOutcome::NoDecision {
                        symbol: instrument.symbol.clone(),
                        reason,
                    },
                    quote: Some(quote),
                    freshness: Some(verdict),
                    returns,
                    regime_tag: memory_ctx.regime_tag,
                });
            }
        };

        // Strict quorum: a single-oracle fallback is not an answer
        if self.strict_quorum
            && signal.meta.fallback_tier == FallbackTier::Single
            && !signal.meta.quorum_met
        {
            return Ok(Analysis {
                outcome: DecisionOutcome::NoDecision {
                    symbol: instrument.symbol.clone(),
                    reason: NoDecisionReason::QuorumNotMet {
                        responding: signal.meta.providers_used.len(),
                        required: self.aggregator.config().quorum_min,
                    },
                },
                quote: Some(quote),
                freshness: Some(verdict),
                returns,
                regime_tag: memory_ctx.regime_tag,
            });
        }

        if signal.action == TradeAction::NoDecision {
            return Ok(Analysis {
                outcome: DecisionOutcome::NoDecision {
                    symbol: instrument.symbol.clone(),
                    reason: NoDecisionReason::OraclesDeclined,
                },
                quote: Some(quote),
                freshness: Some(verdict),
                returns,
                regime_tag: memory_ctx.regime_tag,
            });
        }

        let entry = quote.mid();
        let stop_loss = signal
            .stop_loss
            .or_else(|| default_stop(entry, signal.action, self.sizer.config().default_stop_loss_pct));
        let sized = self.sizer.compute(equity, entry, stop_loss);

        let decision = Decision {
            id: Uuid::new_v4(),
            instrument: instrument.clone(),
            action: signal.action,
            confidence: signal.confidence,
            recommended_size: if signal.action == TradeAction::Hold {
                None
            } else {
                sized.size
            },
            entry,
            stop_loss,
            take_profit: signal.take_profit,
            ensemble: signal.meta,
            signal_only: sized.signal_only || signal.action == TradeAction::Hold,
            origin: DecisionOrigin::Live,
            created_at: now,
        };

        Ok(Analysis {
            outcome: DecisionOutcome::Actionable(decision),
            quote: Some(quote),
            freshness: Some(verdict),
            returns,
            regime_tag: memory_ctx.regime_tag,
        })
    }

    /// Recent one-period close-to-close returns; empty on any failure (the
    /// VaR check degrades to its volatility prior).
    async fn fetch_returns(&self, instrument: &Instrument) -> Vec<f64> {
        match self
            .data
            .candles(instrument, self.config.candle_history)
            .await
        {
            Ok(candles) => {
                let closes: Vec<f64> = candles
                    .iter()
                    .filter_map(|c| c.close.to_f64())
                    .collect();
                closes
                    .windows(2)
                    .filter(|w| w[0] != 0.0)
                    .map(|w| (w[1] - w[0]) / w[0])
                    .collect()
            }
            Err(e) => {
                debug!(
                    "TradingAgent [{}]: candle history unavailable: {:#}",
                    instrument.symbol, e
                );
                Vec::new()
            }
        }
    }

    async fn risk_check<'a>(
        &self,
        perception: &Perception,
        view: &CycleView,
        analyses: &'a [Analysis],
    ) -> Vec<(&'a Analysis, Decision)> {
        let mut approved = Vec::new();
        for analysis in analyses {
            let Some(decision) = analysis.outcome.as_actionable() else {
                continue;
            };
            if !matches!(decision.action, TradeAction::Buy | TradeAction::Sell) {
                debug!(
                    "TradingAgent [{}]: {} decision needs no execution",
                    decision.instrument.symbol, decision.action
                );
                continue;
            }
            let (Some(freshness), Some(quote)) = (&analysis.freshness, &analysis.quote) else {
                continue;
            };

            let ctx = RiskContext {
                decision,
                freshness,
                session: quote.session,
                equity: perception.equity,
                day_pnl: perception.day_pnl,
                drawdown: perception.drawdown,
                positions: &perception.positions,
                current_prices: &view.prices,
                returns: &analysis.returns,
                correlations: view.correlations.as_ref(),
                trades_today: self.ledger.trades_today().await,
                limits: &self.limits,
                allow_closed_sessions: self.config.allow_closed_sessions,
            };

            match self.gatekeeper.assess(&ctx).await {
                RiskVerdict::Approved => approved.push((analysis, decision.clone())),
                RiskVerdict::Rejected { reason, detail } => {
                    self.metrics
                        .risk_rejections_total
                        .with_label_values(&[&reason.to_string()])
                        .inc();
                    info!(
                        "TradingAgent [{}]: decision {} rejected ({}): {}",
                        decision.instrument.symbol, decision.id, reason, detail
                    );
                }
            }
        }
        approved
    }

    async fn execute_approved(
        &self,
        perception: &Perception,
        view: &CycleView,
        approved: Vec<(&Analysis, Decision)>,
    ) {
        for (analysis, decision) in approved {
            let (Some(freshness), Some(quote)) = (&analysis.freshness, &analysis.quote) else {
                continue;
            };
            // The dispatch-time re-check must judge against the same
            // prices and correlations the gatekeeper just approved under
            let ctx = DispatchContext {
                freshness: freshness.clone(),
                session: quote.session,
                day_pnl: perception.day_pnl,
                drawdown: perception.drawdown,
                positions: perception.positions.clone(),
                current_prices: view.prices.clone(),
                returns: analysis.returns.clone(),
                correlations: view.correlations.clone(),
                limits: self.limits.clone(),
                allow_closed_sessions: self.config.allow_closed_sessions,
                regime_tag: analysis.regime_tag.clone(),
            };

            let result = self.coordinator.execute(&decision, &ctx).await;
            let status_label = match &result.status {
                ExecutionStatus::Filled { .. } => "filled",
                ExecutionStatus::Rejected { .. } => "rejected",
                ExecutionStatus::Failed { .. } => "failed",
                ExecutionStatus::AwaitingApproval => "awaiting_approval",
            };
            self.metrics
                .executions_total
                .with_label_values(&[status_label])
                .inc();
            let _ = self
                .wiring
                .events_tx
                .send(AgentEvent::ExecutionCompleted(result));
        }
    }
}

enum IdleOutcome {
    Tick,
    Stop,
    Cancelled,
}

fn no_decision_label(reason: &NoDecisionReason) -> &'static str {
    match reason {
        NoDecisionReason::StaleData { .. } => "stale_data",
        NoDecisionReason::QuorumNotMet { .. } => "quorum_not_met",
        NoDecisionReason::AllProvidersFailed => "all_providers_failed",
        NoDecisionReason::OraclesDeclined => "oracles_declined",
        NoDecisionReason::CircuitOpen { .. } => "circuit_open",
        NoDecisionReason::MarketClosed { .. } => "market_closed",
    }
}

fn provider_failure_label(failure: &ProviderError) -> &'static str {
    match failure {
        ProviderError::Timeout { .. } => "timeout",
        ProviderError::InvalidOutput { .. } => "invalid_output",
        ProviderError::RateLimited { .. } => "rate_limited",
        ProviderError::Transport { .. } => "transport",
        ProviderError::CircuitOpen { .. } => "circuit_open",
        ProviderError::DeadlineElapsed { .. } => "deadline",
    }
}

/// Pearson correlation over the overlapping prefix of two return series.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Pairwise correlation matrix over this cycle's return series. `None`
/// when fewer than two instruments have usable history.
fn correlation_matrix(
    series: &[(&str, &[f64])],
) -> Option<HashMap<(String, String), f64>> {
    if series.len() < 2 {
        return None;
    }
    let mut matrix = HashMap::new();
    for (i, (sym_a, returns_a)) in series.iter().enumerate() {
        for (sym_b, returns_b) in series.iter().skip(i + 1) {
            if let Some(corr) = pearson(returns_a, returns_b) {
                matrix.insert((sym_a.to_string(), sym_b.to_string()), corr);
            }
        }
    }
    (!matrix.is_empty()).then_some(matrix)
}

/// Default protective stop on the correct side of the entry.
fn default_stop(entry: Decimal, action: TradeAction, stop_pct: f64) -> Option<Decimal> {
    let pct = Decimal::from_f64(stop_pct)?;
    if pct <= Decimal::ZERO {
        return None;
    }
    match action {
        TradeAction::Buy => Some(entry - entry * pct),
        TradeAction::Sell => Some(entry + entry * pct),
        TradeAction::Hold | TradeAction::NoDecision => None,
    }
}

/// Market-context prompt handed to every oracle.
fn build_prompt(instrument: &Instrument, quote: &Quote, memory: &MemoryContext) -> String {
    let mut prompt = format!(
        "Assess {} ({}) on {}.\nbid={} ask={} mid={} session={}\nregime={}",
        instrument.symbol,
        instrument.asset_class,
        instrument.venue,
        quote.bid,
        quote.ask,
        quote.mid(),
        quote.session,
        memory.regime_tag,
    );
    if !memory.similar_past.is_empty() {
        prompt.push_str(&format!(
            "\nprior_similar_decisions={}",
            memory.similar_past.len()
        ));
    }
    prompt.push_str(
        "\nRespond with action (BUY/SELL/HOLD/NO_DECISION), confidence 0-100, reasoning, and optional amount, stop_loss, take_profit.",
    );
    prompt
}
