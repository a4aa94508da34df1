//! Execution coordinator.
//!
//! At-most-once order dispatch keyed by `Decision.id`: replays return the
//! cached result without touching the venue, and the id travels to the
//! venue as `client_order_id` so a supporting exchange deduplicates too.
//! Size is recomputed at dispatch time against current equity; when the
//! picture changed (size flip, signal-only flip) the gatekeeper re-runs
//! exactly once. Venue calls are breaker-wrapped, transient failures retry
//! with full-jitter backoff, and signal-only decisions go to the approval
//! transports instead of the venue.

use crate::application::freshness::FreshnessVerdict;
use crate::application::monitoring::position_monitor::{DecisionProvenance, ExecutionNotice};
use crate::application::risk_management::{
    RiskContext, RiskGatekeeper, RiskVerdict, SizingEngine,
};
use crate::domain::errors::PlatformError;
use crate::domain::ports::{ApprovalTransportPort, OrderAck, PlatformPort};
use crate::domain::types::{
    position_key, Decision, Position, PositionSide, RiskLimits, SessionState, TradeAction,
};
use crate::infrastructure::core::CircuitBreakerError;
use crate::infrastructure::resources::{ResourceRegistry, ServiceKey};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ledger::TradeLedger;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub venue_timeout: Duration,
    pub approval_timeout: Duration,
    pub cooldown: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            venue_timeout: Duration::from_secs(10),
            approval_timeout: Duration::from_secs(5),
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    Filled { ack: OrderAck },
    Rejected { reason: String },
    Failed { reason: String },
    AwaitingApproval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub decision_id: Uuid,
    pub status: ExecutionStatus,
}

/// Everything the dispatch-time risk re-check needs, captured from the
/// cycle that produced the decision. Equity is deliberately absent: it is
/// re-fetched from the venue at dispatch time.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub freshness: FreshnessVerdict,
    pub session: SessionState,
    pub day_pnl: Decimal,
    pub drawdown: f64,
    pub positions: HashMap<String, Position>,
    pub current_prices: HashMap<String, Decimal>,
    pub returns: Vec<f64>,
    pub correlations: Option<HashMap<(String, String), f64>>,
    pub limits: RiskLimits,
    pub allow_closed_sessions: bool,
    pub regime_tag: String,
}

pub struct ExecutionCoordinator {
    platform: Arc<dyn PlatformPort>,
    approvals: Vec<Arc<dyn ApprovalTransportPort>>,
    registry: Arc<ResourceRegistry>,
    credential_id: String,
    gatekeeper: Arc<RiskGatekeeper>,
    sizer: Arc<SizingEngine>,
    ledger: Arc<TradeLedger>,
    monitor_notices: mpsc::Sender<ExecutionNotice>,
    config: ExecutionConfig,

    executed: Mutex<HashMap<Uuid, ExecutionResult>>,
    instrument_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: Arc<dyn PlatformPort>,
        approvals: Vec<Arc<dyn ApprovalTransportPort>>,
        registry: Arc<ResourceRegistry>,
        credential_id: impl Into<String>,
        gatekeeper: Arc<RiskGatekeeper>,
        sizer: Arc<SizingEngine>,
        ledger: Arc<TradeLedger>,
        monitor_notices: mpsc::Sender<ExecutionNotice>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            platform,
            approvals,
            registry,
            credential_id: credential_id.into(),
            gatekeeper,
            sizer,
            ledger,
            monitor_notices,
            config,
            executed: Mutex::new(HashMap::new()),
            instrument_locks: Mutex::new(HashMap::new()),
        }
    }

    fn venue_key(&self) -> ServiceKey {
        ServiceKey::new("venue", self.credential_id.clone())
    }

    async fn instrument_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.instrument_locks.lock().await;
        Arc::clone(
            locks
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn record(&self, result: ExecutionResult) -> ExecutionResult {
        self.executed
            .lock()
            .await
            .insert(result.decision_id, result.clone());
        result
    }

    /// Execute a risk-approved decision. Exactly one result is ever
    /// produced per decision id; replays return it verbatim.
    pub async fn execute(&self, decision: &Decision, ctx: &DispatchContext) -> ExecutionResult {
        if let Some(prior) = self.executed.lock().await.get(&decision.id) {
            debug!(
                "ExecutionCoordinator: replay of decision {}, returning cached result",
                decision.id
            );
            return prior.clone();
        }

        // Cross-instrument dispatch stays parallel; same-instrument
        // dispatch is serial.
        let lock = self.instrument_lock(&decision.instrument.symbol).await;
        let _guard = lock.lock().await;

        if let Some(prior) = self.executed.lock().await.get(&decision.id) {
            return prior.clone();
        }

        let result = self.dispatch(decision, ctx).await;
        self.record(result).await
    }

    async fn dispatch(&self, decision: &Decision, ctx: &DispatchContext) -> ExecutionResult {
        if decision.signal_only {
            return self.publish_for_approval(decision).await;
        }

        // Equity may have moved since REASONING: recompute the size and
        // re-run the gatekeeper once when the picture changed.
        let resources = self.registry.resources_for(&self.venue_key()).await;
        resources.limiter.acquire().await;
        let equity = match resources.breaker.call(self.platform.balance()).await {
            Ok(balance) => balance.equity,
            Err(CircuitBreakerError::Open(info)) => {
                return ExecutionResult {
                    decision_id: decision.id,
                    status: ExecutionStatus::Failed {
                        reason: format!("circuit_open: {}", info),
                    },
                };
            }
            Err(CircuitBreakerError::Inner(e)) => {
                return ExecutionResult {
                    decision_id: decision.id,
                    status: ExecutionStatus::Failed {
                        reason: format!("balance fetch failed: {:#}", e),
                    },
                };
            }
        };

        let resized = self
            .sizer
            .compute(equity, decision.entry, decision.stop_loss);
        let mut dispatched = decision.clone();

        if resized.signal_only {
            info!(
                "ExecutionCoordinator [{}]: size recompute flipped decision {} to signal-only",
                decision.instrument.symbol, decision.id
            );
            dispatched.recommended_size = None;
            dispatched.signal_only = true;
        } else if resized.size != decision.recommended_size {
            debug!(
                "ExecutionCoordinator [{}]: size recomputed {:?} -> {:?}",
                decision.instrument.symbol, decision.recommended_size, resized.size
            );
            dispatched.recommended_size = resized.size;
        }

        if dispatched.signal_only || dispatched.recommended_size != decision.recommended_size {
            let recheck = RiskContext {
                decision: &dispatched,
                freshness: &ctx.freshness,
                session: ctx.session,
                equity,
                day_pnl: ctx.day_pnl,
                drawdown: ctx.drawdown,
                positions: &ctx.positions,
                current_prices: &ctx.current_prices,
                returns: &ctx.returns,
                correlations: ctx.correlations.as_ref(),
                trades_today: self.ledger.trades_today().await,
                limits: &ctx.limits,
                allow_closed_sessions: ctx.allow_closed_sessions,
            };
            if let RiskVerdict::Rejected { reason, detail } =
                self.gatekeeper.assess(&recheck).await
            {
                return ExecutionResult {
                    decision_id: decision.id,
                    status: ExecutionStatus::Rejected {
                        reason: format!("{}: {}", reason, detail),
                    },
                };
            }
        }

        if dispatched.signal_only {
            return self.publish_for_approval(&dispatched).await;
        }

        let Some(size) = dispatched.recommended_size else {
            return ExecutionResult {
                decision_id: decision.id,
                status: ExecutionStatus::Rejected {
                    reason: "unsized decision reached dispatch".to_string(),
                },
            };
        };

        let side = match dispatched.action {
            TradeAction::Buy => PositionSide::Long,
            TradeAction::Sell => PositionSide::Short,
            TradeAction::Hold | TradeAction::NoDecision => {
                return ExecutionResult {
                    decision_id: decision.id,
                    status: ExecutionStatus::Rejected {
                        reason: format!("{} is not executable", dispatched.action),
                    },
                };
            }
        };

        // Pre-reserve the daily slot; rolled back on any failure below
        self.ledger.reserve().await;

        match self.open_with_retries(&dispatched, side, size).await {
            Ok(ack) => {
                if ack.filled_size < size {
                    warn!(
                        "ExecutionCoordinator [{}]: partial fill {} of {} for decision {}; monitor will reconcile",
                        dispatched.instrument.symbol, ack.filled_size, size, decision.id
                    );
                }

                let position_id = position_key(
                    &dispatched.instrument.venue,
                    &dispatched.instrument.symbol,
                    side,
                    ack.fill_price,
                );
                let notice = ExecutionNotice::Expected {
                    position_id,
                    provenance: DecisionProvenance {
                        decision_id: decision.id,
                        oracle_ids: decision.ensemble.providers_used.clone(),
                        regime_tag: ctx.regime_tag.clone(),
                    },
                };
                if self.monitor_notices.send(notice).await.is_err() {
                    warn!("ExecutionCoordinator: monitor notice channel closed");
                }

                let now = chrono::Utc::now();
                self.ledger
                    .start_cooldown(&dispatched.instrument.symbol, now, self.config.cooldown)
                    .await;

                info!(
                    "ExecutionCoordinator [{}]: filled decision {} ({} {} @ {})",
                    dispatched.instrument.symbol, decision.id, side, ack.filled_size, ack.fill_price
                );
                ExecutionResult {
                    decision_id: decision.id,
                    status: ExecutionStatus::Filled { ack },
                }
            }
            Err(result_status) => {
                self.ledger.rollback().await;
                ExecutionResult {
                    decision_id: decision.id,
                    status: result_status,
                }
            }
        }
    }

    /// Venue dispatch with exponential backoff and full jitter. Transient
    /// faults retry up to `max_retries`; the breaker counts every failure.
    async fn open_with_retries(
        &self,
        decision: &Decision,
        side: PositionSide,
        size: Decimal,
    ) -> Result<OrderAck, ExecutionStatus> {
        let client_order_id = decision.id.to_string();
        let mut attempt = 0u32;

        loop {
            let resources = self.registry.resources_for(&self.venue_key()).await;
            resources.limiter.acquire().await;

            let venue_timeout = self.config.venue_timeout;
            let call = resources.breaker.call(async {
                match tokio::time::timeout(
                    venue_timeout,
                    self.platform.open(
                        &decision.instrument,
                        side,
                        size,
                        decision.stop_loss,
                        decision.take_profit,
                        &client_order_id,
                    ),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PlatformError::Timeout {
                        timeout_ms: venue_timeout.as_millis() as u64,
                    }),
                }
            });

            let error = match call.await {
                Ok(ack) => return Ok(ack),
                Err(CircuitBreakerError::Open(info)) => {
                    return Err(ExecutionStatus::Failed {
                        reason: format!("circuit_open: {}", info),
                    });
                }
                Err(CircuitBreakerError::Inner(e)) => e,
            };

            if !error.is_transient() {
                return Err(ExecutionStatus::Rejected {
                    reason: error.to_string(),
                });
            }

            attempt += 1;
            if attempt > self.config.max_retries {
                error!(
                    "ExecutionCoordinator [{}]: transient failure persisted through {} retries: {}",
                    decision.instrument.symbol, self.config.max_retries, error
                );
                return Err(ExecutionStatus::Failed {
                    reason: format!("retries exhausted: {}", error),
                });
            }

            // Full jitter: sleep uniformly within the doubled window
            let ceiling = self.config.backoff_base.as_millis() as u64 * 2u64.pow(attempt - 1);
            let jittered = {
                use rand::Rng;
                rand::rng().random_range(0..=ceiling)
            };
            warn!(
                "ExecutionCoordinator [{}]: attempt {} failed ({}), retrying in {}ms",
                decision.instrument.symbol, attempt, error, jittered
            );
            tokio::time::sleep(Duration::from_millis(jittered)).await;
        }
    }

    /// Signal-only path: publish to the approval transports. At least one
    /// must acknowledge or the failure is loud.
    async fn publish_for_approval(&self, decision: &Decision) -> ExecutionResult {
        let mut acked = 0usize;
        for transport in &self.approvals {
            match tokio::time::timeout(self.config.approval_timeout, transport.publish(decision))
                .await
            {
                Ok(Ok(ack)) if ack.accepted => {
                    debug!(
                        "ExecutionCoordinator: transport {} acked decision {}",
                        transport.transport_id(),
                        decision.id
                    );
                    acked += 1;
                }
                Ok(Ok(_)) => {
                    warn!(
                        "ExecutionCoordinator: transport {} declined decision {}",
                        transport.transport_id(),
                        decision.id
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        "ExecutionCoordinator: transport {} publish error: {:#}",
                        transport.transport_id(),
                        e
                    );
                }
                Err(_) => {
                    warn!(
                        "ExecutionCoordinator: transport {} publish timed out",
                        transport.transport_id()
                    );
                }
            }
        }

        if acked == 0 {
            let failure = crate::domain::errors::DeliveryError {
                decision_id: decision.id,
                attempted: self.approvals.len(),
            };
            error!("ExecutionCoordinator: {}", failure);
            return ExecutionResult {
                decision_id: decision.id,
                status: ExecutionStatus::Failed {
                    reason: "no_delivery_channel".to_string(),
                },
            };
        }

        info!(
            "ExecutionCoordinator [{}]: decision {} awaiting approval ({} transports acked)",
            decision.instrument.symbol, decision.id, acked
        );
        ExecutionResult {
            decision_id: decision.id,
            status: ExecutionStatus::AwaitingApproval,
        }
    }
}
