//! At-most-once execution: one result per decision id, replays are
//! cache hits, and concurrent replays of the same decision never reach
//! the venue twice.

use chrono::Utc;
use quorumtrade::application::execution::{
    DispatchContext, ExecutionConfig, ExecutionCoordinator, ExecutionStatus, TradeLedger,
};
use quorumtrade::application::freshness::{FreshnessReason, FreshnessVerdict};
use quorumtrade::application::risk_management::{
    RiskGatekeeper, SizingConfig, SizingEngine,
};
use quorumtrade::domain::types::{
    AssetClass, Decision, DecisionOrigin, EnsembleMeta, Instrument, RiskLimits, SessionState,
    TradeAction,
};
use quorumtrade::infrastructure::mock::{MockApprovalTransport, MockPlatform};
use quorumtrade::infrastructure::resources::{RateTier, ResourceConfig, ResourceRegistry};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn buy_decision() -> Decision {
    Decision {
        id: Uuid::new_v4(),
        instrument: Instrument::new("BTC/USD", AssetClass::Crypto, "binance"),
        action: TradeAction::Buy,
        confidence: 80,
        recommended_size: Some(dec!(0.1)),
        entry: dec!(50000),
        stop_loss: Some(dec!(45000)),
        take_profit: Some(dec!(55000)),
        ensemble: EnsembleMeta::recovery(),
        signal_only: false,
        origin: DecisionOrigin::Live,
        created_at: Utc::now(),
    }
}

fn dispatch_ctx() -> DispatchContext {
    DispatchContext {
        freshness: FreshnessVerdict {
            fresh: true,
            age: chrono::Duration::seconds(2),
            limit: chrono::Duration::minutes(5),
            reason: FreshnessReason::Fresh,
        },
        session: SessionState::Open,
        day_pnl: Decimal::ZERO,
        drawdown: 0.0,
        positions: HashMap::new(),
        current_prices: HashMap::new(),
        returns: Vec::new(),
        correlations: None,
        limits: RiskLimits {
            max_drawdown: 0.2,
            max_var_pct: 0.3,
            max_single_position: 0.6,
            max_correlated: 3,
            correlation_threshold: 0.8,
            max_daily_trades: 20,
            kill_switch_pct: 0.1,
        },
        allow_closed_sessions: false,
        regime_tag: "mixed".to_string(),
    }
}

fn coordinator(
    platform: &MockPlatform,
) -> (
    Arc<ExecutionCoordinator>,
    mpsc::Receiver<quorumtrade::application::monitoring::ExecutionNotice>,
) {
    let (notice_tx, notice_rx) = mpsc::channel(32);
    let registry = Arc::new(ResourceRegistry::new(ResourceConfig {
        free_tier: RateTier {
            rate_per_sec: 10_000.0,
            capacity: 10_000.0,
        },
        ..ResourceConfig::default()
    }));

    let coordinator = ExecutionCoordinator::new(
        Arc::new(platform.clone()),
        vec![Arc::new(MockApprovalTransport::new("chat", true))],
        registry,
        "cred",
        Arc::new(RiskGatekeeper::standard()),
        Arc::new(SizingEngine::new(SizingConfig {
            // Match the decision's own sizing so no re-check path triggers
            risk_per_trade: 0.005,
            max_single_position: 0.6,
            ..SizingConfig::default()
        })),
        Arc::new(TradeLedger::new(Utc::now())),
        notice_tx,
        ExecutionConfig {
            backoff_base: Duration::from_millis(2),
            ..ExecutionConfig::default()
        },
    );
    (Arc::new(coordinator), notice_rx)
}

#[tokio::test]
async fn test_replay_returns_prior_filled_result() {
    let platform = MockPlatform::new(dec!(100000));
    platform.set_fill_price("BTC/USD", dec!(50000)).await;
    let (coordinator, _notices) = coordinator(&platform);

    let decision = buy_decision();
    let first = coordinator.execute(&decision, &dispatch_ctx()).await;
    assert!(matches!(first.status, ExecutionStatus::Filled { .. }));
    let venue_calls = platform.open_call_count();

    // Second call with the same id: cached result, no venue traffic
    let second = coordinator.execute(&decision, &dispatch_ctx()).await;
    assert_eq!(first, second);
    assert_eq!(platform.open_call_count(), venue_calls);
}

#[tokio::test]
async fn test_failed_results_replay_too() {
    use quorumtrade::domain::errors::PlatformError;

    let platform = MockPlatform::new(dec!(100000));
    platform.set_fill_price("BTC/USD", dec!(50000)).await;
    platform
        .fail_next_open(PlatformError::Validation {
            reason: "tick size".to_string(),
        })
        .await;
    let (coordinator, _notices) = coordinator(&platform);

    let decision = buy_decision();
    let first = coordinator.execute(&decision, &dispatch_ctx()).await;
    assert!(matches!(first.status, ExecutionStatus::Rejected { .. }));

    let second = coordinator.execute(&decision, &dispatch_ctx()).await;
    assert_eq!(first, second);
    assert_eq!(platform.open_call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_replays_hit_the_venue_once() {
    let platform = MockPlatform::new(dec!(100000));
    platform.set_fill_price("BTC/USD", dec!(50000)).await;
    let (coordinator, _notices) = coordinator(&platform);

    let decision = buy_decision();
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        let decision = decision.clone();
        tasks.push(tokio::spawn(async move {
            coordinator.execute(&decision, &dispatch_ctx()).await
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    assert_eq!(platform.open_call_count(), 1);
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }

    // The venue saw the decision id as client_order_id exactly once
    assert_eq!(
        platform.client_order_ids().await,
        vec![decision.id.to_string()]
    );
}

#[tokio::test]
async fn test_distinct_decisions_execute_independently() {
    let platform = MockPlatform::new(dec!(100000));
    platform.set_fill_price("BTC/USD", dec!(50000)).await;
    let (coordinator, _notices) = coordinator(&platform);

    let first = coordinator.execute(&buy_decision(), &dispatch_ctx()).await;
    let second = coordinator.execute(&buy_decision(), &dispatch_ctx()).await;

    assert_ne!(first.decision_id, second.decision_id);
    assert_eq!(platform.open_call_count(), 2);
}
