//! Application assembly.
//!
//! Wires configuration into the full pipeline: resource registry, memory
//! store and engine, position monitor, oracle pool, aggregator, gatekeeper,
//! sizer, coordinator, and the agent itself. `mock` mode runs entirely on
//! the deterministic in-memory adapters; `live` mode expects the embedding
//! deployment to supply real adapters through [`Adapters`].

use crate::application::agent::{
    agent_channels, AgentConfig, AgentExit, AgentHandle, TradingAgent,
};
use crate::application::ensemble::{EnsembleAggregator, EnsembleConfig};
use crate::application::execution::{ExecutionConfig, ExecutionCoordinator, TradeLedger};
use crate::application::freshness::FreshnessGate;
use crate::application::memory::{MemoryConfig, MemoryEngine};
use crate::application::monitoring::{MonitorConfig, PositionMonitor};
use crate::application::providers::{DecisionProviderPool, ProviderPoolConfig};
use crate::application::risk_management::{RiskGatekeeper, SizingConfig, SizingEngine};
use crate::config::{Config, Mode};
use crate::domain::ports::{
    ApprovalTransportPort, DataProviderPort, DecisionProviderPort, MemoryStorePort, PlatformPort,
};
use crate::domain::types::TradeAction;
use crate::infrastructure::mock::{
    MockApprovalTransport, MockDataProvider, MockOracle, MockPlatform,
};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::{FileMemoryStore, StateFile};
use crate::infrastructure::resources::{RateTier, ResourceConfig, ResourceRegistry};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Port implementations for a live deployment. The core never constructs
/// real adapters itself.
pub struct Adapters {
    pub data: Arc<dyn DataProviderPort>,
    pub platform: Arc<dyn PlatformPort>,
    pub oracles: Vec<Arc<dyn DecisionProviderPort>>,
    pub approvals: Vec<Arc<dyn ApprovalTransportPort>>,
}

pub struct Application {
    agent: TradingAgent,
    monitor: PositionMonitor,
    handle: AgentHandle,
}

pub struct RunningApplication {
    pub handle: AgentHandle,
    pub agent_task: JoinHandle<AgentExit>,
    shutdown_tx: watch::Sender<bool>,
}

impl RunningApplication {
    /// Request cancellation (signal path, exit code 130).
    pub fn cancel(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Deterministic mock world: scripted quotes, an instantly-filling venue,
/// oracles that hold, and an acking approval transport.
async fn mock_adapters(config: &Config) -> Adapters {
    let data = MockDataProvider::new();
    let platform = MockPlatform::new(Decimal::from(10_000));

    for (i, instrument) in config.instruments.iter().enumerate() {
        let price = Decimal::from(100 + (i as i64) * 50);
        data.set_price(instrument, price).await;
        platform.set_fill_price(&instrument.symbol, price).await;
    }

    let oracles: Vec<Arc<dyn DecisionProviderPort>> = config
        .ensemble
        .providers
        .iter()
        .map(|id| {
            Arc::new(MockOracle::answering(id, TradeAction::Hold, 55))
                as Arc<dyn DecisionProviderPort>
        })
        .collect();

    Adapters {
        data: Arc::new(data),
        platform: Arc::new(platform),
        oracles,
        approvals: vec![Arc::new(MockApprovalTransport::new("mock-chat", true))],
    }
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let adapters = match config.mode {
            Mode::Mock => mock_adapters(&config).await,
            Mode::Live => anyhow::bail!(
                "MODE=live requires adapter wiring; use Application::build_with_adapters"
            ),
        };
        Self::build_with_adapters(config, adapters).await
    }

    pub async fn build_with_adapters(config: Config, adapters: Adapters) -> Result<Self> {
        let registry = Arc::new(ResourceRegistry::new(ResourceConfig {
            failure_threshold: config.resources.cb_failure_threshold,
            recovery_timeout: config.resources.cb_recovery_timeout,
            free_tier: RateTier {
                rate_per_sec: config.resources.rate_free_per_sec,
                capacity: config.resources.rate_free_capacity,
            },
            paid_tier: RateTier {
                rate_per_sec: config.resources.rate_paid_per_sec,
                capacity: config.resources.rate_paid_capacity,
            },
            paid_credentials: config.resources.paid_credentials.clone(),
            pool_size: config.resources.pool_size,
            pool_acquire_timeout: config.resources.pool_acquire_timeout,
            pooled_services: vec!["venue".to_string()],
        }));

        // Isolation namespaces the storage root by config fingerprint
        let isolation = config.memory.isolation_mode.then(|| config.fingerprint());
        let store: Arc<dyn MemoryStorePort> = Arc::new(
            FileMemoryStore::open(&config.memory.root, isolation.as_deref())
                .await
                .context("failed to open memory store")?,
        );

        let memory = Arc::new(
            MemoryEngine::load(
                Arc::clone(&store),
                MemoryConfig {
                    ema_alpha: config.memory.ema_alpha,
                    weight_floor: config.memory.weight_floor,
                    similar_k: config.memory.similar_k,
                    regime_window: config.memory.regime_window,
                },
            )
            .await
            .context("failed to load memory engine")?,
        );

        let (monitor, monitor_handles) = PositionMonitor::new(
            Arc::clone(&adapters.platform),
            Arc::clone(&adapters.data),
            Arc::clone(&registry),
            config.credential_id.clone(),
            StateFile::new(config.memory.root.join("monitor-checkpoint.json")),
            MonitorConfig {
                poll_interval: config.monitor.poll_interval,
                max_trackers: config.monitor.max_concurrent_trackers,
                tracker_poll_interval: config.monitor.tracker_poll_interval,
                cross_confirmations: config.monitor.cross_confirmations,
                outcome_channel_capacity: 64,
                startup_max_retries: config.monitor.startup_max_retries,
                startup_backoff_base: config.monitor.startup_backoff_base,
                max_hold: config.monitor.max_hold,
            },
        );

        let pool = Arc::new(DecisionProviderPool::new(
            adapters.oracles,
            Arc::clone(&registry),
            config.credential_id.clone(),
            ProviderPoolConfig {
                per_call_timeout: config.ensemble.per_call_timeout,
                global_deadline: config.ensemble.global_deadline,
                max_concurrency: config.ensemble.max_concurrency,
            },
        ));

        let aggregator = Arc::new(EnsembleAggregator::new(EnsembleConfig {
            base_weights: config.ensemble.provider_weights.clone(),
            quorum_min: config.ensemble.quorum_min,
            strategy: config.ensemble.voting_strategy,
            strict_quorum: config.ensemble.strict_quorum,
        }));

        let gatekeeper = Arc::new(RiskGatekeeper::standard());
        let sizer = Arc::new(SizingEngine::new(SizingConfig {
            risk_per_trade: config.risk.risk_per_trade,
            min_equity_floor: config.risk.min_equity_floor,
            venue_min_size: config.risk.venue_min_size,
            max_single_position: config.risk.limits.max_single_position,
            default_stop_loss_pct: config.risk.default_stop_loss_pct,
            signal_only_default: config.risk.signal_only_default,
        }));
        let ledger = Arc::new(TradeLedger::new(Utc::now()));

        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::clone(&adapters.platform),
            adapters.approvals,
            Arc::clone(&registry),
            config.credential_id.clone(),
            Arc::clone(&gatekeeper),
            Arc::clone(&sizer),
            Arc::clone(&ledger),
            monitor_handles.notices.clone(),
            ExecutionConfig {
                max_retries: config.resources.retry_max,
                backoff_base: config.resources.retry_backoff,
                venue_timeout: config.execution.venue_timeout,
                approval_timeout: config.execution.approval_timeout,
                cooldown: config.execution.cooldown,
            },
        ));

        let metrics = Metrics::new().context("failed to register metrics")?;
        let (handle, wiring) = agent_channels();

        let agent = TradingAgent::new(
            AgentConfig {
                instruments: config.instruments.clone(),
                analysis_frequency: config.agent.analysis_frequency,
                learning_batch: config.agent.learning_batch,
                reasoning_concurrency: config.agent.reasoning_concurrency,
                granularity: config.granularity,
                candle_history: config.agent.candle_history,
                fault_decay_secs: config.agent.fault_decay_secs,
                fault_backoff_base_secs: config.agent.fault_backoff_base_secs,
                recovery_max_attempts: config.agent.recovery_max_attempts,
                recovery_backoff_base: config.agent.recovery_backoff_base,
                allow_closed_sessions: config.risk.allow_closed_sessions,
                keepalive: config.agent.keepalive,
                shutdown_drain: config.agent.shutdown_drain,
            },
            config.risk.limits.clone(),
            config.ensemble.strict_quorum,
            adapters.data,
            adapters.platform,
            registry,
            config.credential_id.clone(),
            FreshnessGate::new(config.freshness.config.clone()),
            pool,
            aggregator,
            gatekeeper,
            sizer,
            coordinator,
            memory,
            ledger,
            metrics,
            monitor_handles.events,
            wiring,
        );

        info!(
            "Application: built ({:?} mode, {} instruments, {} oracles)",
            config.mode,
            config.instruments.len(),
            config.ensemble.providers.len()
        );

        Ok(Self {
            agent,
            monitor,
            handle,
        })
    }

    /// Spawn the agent (which drives startup recovery and then spawns the
    /// monitor loop) and hand back the control surface.
    pub fn start(self) -> RunningApplication {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let agent_task = tokio::spawn(self.agent.run(
            self.monitor,
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        RunningApplication {
            handle: self.handle,
            agent_task,
            shutdown_tx,
        }
    }
}
